//! XDG directory resolution and session-name validity checks.

use std::env;
use std::path::PathBuf;

/// Subdirectory used below the XDG roots.
const SUBDIR: &str = "nsm";

/// Default session root: `$XDG_DATA_HOME/nsm`, falling back to
/// `~/.local/share/nsm`.
#[must_use]
pub fn default_session_root() -> PathBuf {
    if let Some(data) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(data).join(SUBDIR);
    }
    if let Some(home) = env::var_os("HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join(".local/share").join(SUBDIR);
    }
    PathBuf::from("/tmp").join(SUBDIR)
}

/// Runtime directory for lock and daemon files:
/// `$XDG_RUNTIME_DIR/nsm`, falling back to `/tmp/nsm`.
#[must_use]
pub fn runtime_dir() -> PathBuf {
    if let Some(run) = env::var_os("XDG_RUNTIME_DIR").filter(|v| !v.is_empty()) {
        return PathBuf::from(run).join(SUBDIR);
    }
    PathBuf::from("/tmp").join(SUBDIR)
}

/// A session name (possibly `album/song` shaped) is valid when it
/// cannot escape the session root.
#[must_use]
pub fn session_name_is_valid(name: &str) -> bool {
    !name.contains("..")
}

/// Executables added to a session must be bare names resolved via
/// `$PATH`, never paths.
#[must_use]
pub fn name_has_path(name: &str) -> bool {
    name.contains('/')
}

/// Strip a single trailing slash from a user-supplied root path.
#[must_use]
pub fn trim_trailing_slash(path: &str) -> &str {
    path.strip_suffix('/').unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotdot_names_are_invalid() {
        assert!(session_name_is_valid("Song"));
        assert!(session_name_is_valid("album/song"));
        assert!(!session_name_is_valid("../escape"));
        assert!(!session_name_is_valid("a/../b"));
    }

    #[test]
    fn path_detection() {
        assert!(!name_has_path("qseq66"));
        assert!(name_has_path("/usr/bin/qseq66"));
        assert!(name_has_path("./qseq66"));
    }

    #[test]
    fn trailing_slash_is_trimmed_once() {
        assert_eq!(trim_trailing_slash("/data/nsm/"), "/data/nsm");
        assert_eq!(trim_trailing_slash("/data/nsm"), "/data/nsm");
    }
}
