//! Session lock files and per-daemon URL files.
//!
//! Lock files live in the runtime directory and guarantee that at most
//! one daemon has a given session open. The lock name is a
//! deterministic function of the session name and its absolute path, so
//! a second daemon resolving the same session observes the same lock.
//! The lock body holds the session path and the owning daemon's OSC
//! URL, one per line.
//!
//! Each running daemon also writes `<runtime>/d/<pid>` containing its
//! OSC URL, which lets clients discover a daemon when `NSM_URL` is not
//! set.

use std::fs;
use std::path::{Path, PathBuf};

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv1a_32(data: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET;
    for &b in data {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Deterministic lock path for `(session_name, session_path)`.
#[must_use]
pub fn lock_file_path(lock_dir: &Path, session_name: &str, session_path: &Path) -> PathBuf {
    let hash = fnv1a_32(session_path.as_os_str().as_encoded_bytes());
    lock_dir.join(format!("{session_name}.{hash:08x}"))
}

/// Write a lock file whose body is the session path and the daemon URL.
pub fn write_lock_file(
    lock_path: &Path,
    session_path: &Path,
    daemon_url: &str,
) -> std::io::Result<()> {
    let body = format!("{}\n{}\n", session_path.display(), daemon_url);
    fs::write(lock_path, body)
}

/// Remove a lock file.
pub fn delete_lock_file(lock_path: &Path) -> std::io::Result<()> {
    fs::remove_file(lock_path)
}

/// The daemon-file directory under the runtime directory.
#[must_use]
pub fn daemon_dir(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join("d")
}

/// The per-daemon URL file `<runtime>/d/<pid>`.
#[must_use]
pub fn daemon_file_path(runtime_dir: &Path, pid: u32) -> PathBuf {
    daemon_dir(runtime_dir).join(pid.to_string())
}

/// Write `<runtime>/d/<pid>` containing `url` plus a newline, creating
/// the `d/` directory if needed.
pub fn write_daemon_file(runtime_dir: &Path, pid: u32, url: &str) -> std::io::Result<PathBuf> {
    let dir = daemon_dir(runtime_dir);
    fs::create_dir_all(&dir)?;
    let path = daemon_file_path(runtime_dir, pid);
    fs::write(&path, format!("{url}\n"))?;
    Ok(path)
}

/// Scan the daemon-file directory and return `(pid, url)` pairs for
/// every readable entry. Used by clients to find a running daemon.
pub fn read_daemon_files(runtime_dir: &Path) -> std::io::Result<Vec<(u32, String)>> {
    let mut daemons = Vec::new();
    for entry in fs::read_dir(daemon_dir(runtime_dir))? {
        let entry = entry?;
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        if let Ok(body) = fs::read_to_string(entry.path()) {
            let url = body.lines().next().unwrap_or("").trim().to_string();
            if !url.is_empty() {
                daemons.push((pid, url));
            }
        }
    }
    Ok(daemons)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_path_is_deterministic() {
        let dir = Path::new("/run/user/1000/nsm");
        let a = lock_file_path(dir, "Song", Path::new("/data/nsm/Song"));
        let b = lock_file_path(dir, "Song", Path::new("/data/nsm/Song"));
        assert_eq!(a, b);

        let c = lock_file_path(dir, "Song", Path::new("/other/nsm/Song"));
        assert_ne!(a, c, "different session paths must not share a lock");
    }

    #[test]
    fn lock_body_holds_path_and_url() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_file_path(dir.path(), "Song", Path::new("/data/nsm/Song"));
        write_lock_file(&lock, Path::new("/data/nsm/Song"), "osc.udp://host:7777/").unwrap();

        let body = std::fs::read_to_string(&lock).unwrap();
        assert_eq!(body, "/data/nsm/Song\nosc.udp://host:7777/\n");

        delete_lock_file(&lock).unwrap();
        assert!(!lock.exists());
    }

    #[test]
    fn daemon_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_daemon_file(dir.path(), 4242, "osc.udp://host:7777/").unwrap();
        assert_eq!(path, dir.path().join("d").join("4242"));

        let daemons = read_daemon_files(dir.path()).unwrap();
        assert_eq!(daemons, vec![(4242, "osc.udp://host:7777/".to_string())]);
    }
}
