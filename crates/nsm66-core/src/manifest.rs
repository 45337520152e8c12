//! Session manifest I/O.
//!
//! A session directory is marked by a `session.nsm` file listing one
//! client per line as `name:exe:id`, with no escaping. The client name
//! cannot contain a colon, but the executable may: the name is the text
//! before the first colon and the ID the text after the last one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// File name that marks a directory as a session.
pub const SESSION_FILE: &str = "session.nsm";

/// One `name:exe:id` row of a session manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Client name; the executable basename until the client announces.
    pub name: String,
    /// Executable path used to launch the client.
    pub exe: String,
    /// Short client ID of the form `nWXYZ`.
    pub id: String,
}

impl ManifestEntry {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        exe: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            exe: exe.into(),
            id: id.into(),
        }
    }
}

/// Manifest read/write errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// A non-blank line did not contain the two delimiting colons.
    #[error("malformed manifest line {line}: {text:?}")]
    Malformed { line: usize, text: String },

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The manifest path inside a session directory.
#[must_use]
pub fn session_file_path(session_path: &Path) -> PathBuf {
    session_path.join(SESSION_FILE)
}

/// Parse manifest text. Blank lines are skipped; a malformed line
/// aborts the parse.
pub fn parse(contents: &str) -> Result<Vec<ManifestEntry>, ManifestError> {
    let mut entries = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let Some((name, rest)) = line.split_once(':') else {
            return Err(ManifestError::Malformed {
                line: idx + 1,
                text: line.to_string(),
            });
        };
        let Some((exe, id)) = rest.rsplit_once(':') else {
            return Err(ManifestError::Malformed {
                line: idx + 1,
                text: line.to_string(),
            });
        };
        entries.push(ManifestEntry::new(name, exe, id));
    }
    Ok(entries)
}

/// Read and parse `<session_path>/session.nsm`.
pub fn read(session_path: &Path) -> Result<Vec<ManifestEntry>, ManifestError> {
    let contents = fs::read_to_string(session_file_path(session_path))?;
    parse(&contents)
}

/// Serialize entries back to manifest text.
#[must_use]
pub fn serialize(entries: &[ManifestEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        out.push_str(&format!("{}:{}:{}\n", e.name, e.exe, e.id));
    }
    out
}

/// Write the manifest. The write goes to a temporary sibling first and
/// is renamed into place, so a failure leaves the old manifest intact.
pub fn write(session_path: &Path, entries: &[ManifestEntry]) -> Result<(), ManifestError> {
    let target = session_file_path(session_path);
    let tmp = session_path.join(".session.nsm.tmp");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(serialize(entries).as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp, &target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_rows() {
        let entries = parse("seq66:qseq66:nWXYZ\n\nfluid:fluidsynth:nABCD\n").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ManifestEntry::new("seq66", "qseq66", "nWXYZ"));
        assert_eq!(entries[1], ManifestEntry::new("fluid", "fluidsynth", "nABCD"));
    }

    #[test]
    fn executable_may_contain_colons() {
        let entries = parse("seq66:/opt/odd:name/qseq66:nWXYZ\n").unwrap();
        assert_eq!(entries[0].exe, "/opt/odd:name/qseq66");
        assert_eq!(entries[0].name, "seq66");
        assert_eq!(entries[0].id, "nWXYZ");
    }

    #[test]
    fn malformed_line_aborts() {
        let err = parse("seq66:qseq66:nWXYZ\nbogus\n").unwrap_err();
        match err {
            ManifestError::Malformed { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            ManifestEntry::new("seq66", "qseq66", "nWXYZ"),
            ManifestEntry::new("jp66", "jackpatch66", "nABCD"),
        ];
        write(dir.path(), &entries).unwrap();
        let back = read(dir.path()).unwrap();
        assert_eq!(back, entries);
        assert_eq!(serialize(&back), "seq66:qseq66:nWXYZ\njp66:jackpatch66:nABCD\n");
    }
}
