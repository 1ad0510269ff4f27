//! Child environment: proxy handling and program lookup.

use std::path::{Path, PathBuf};

/// Proxy variables stripped from the child environment when the proxy is off.
/// Matched case-insensitively.
pub const PROXY_ENV_KEYS: [&str; 5] = [
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
    "SOCKS_PROXY",
    "NO_PROXY",
];

/// Returns true if `key` names a proxy variable, in any case.
pub fn is_proxy_key(key: &str) -> bool {
    PROXY_ENV_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// Proxy variable names to remove from a child environment.
///
/// Covers the canonical upper and lower case spellings plus any other
/// spelling present in our own environment.
pub fn proxy_keys_to_strip() -> Vec<String> {
    let mut keys: Vec<String> = PROXY_ENV_KEYS
        .iter()
        .flat_map(|k| [k.to_string(), k.to_ascii_lowercase()])
        .collect();
    for (key, _) in std::env::vars_os() {
        if let Some(key) = key.to_str() {
            if is_proxy_key(key) && !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
    }
    keys
}

/// Resolve `program` the way a shell would: paths are taken as given, bare
/// names are searched on `PATH`. Returns `None` if nothing executable matches.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return is_executable(path).then(|| path.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}
