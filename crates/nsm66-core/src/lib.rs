//! Shared domain types for the nsm66 session-management daemons.
//!
//! This crate holds everything the session daemon (`nsm66d`) and the
//! JACK patch daemon (`jackpatch66`) have in common: the NSM wire error
//! taxonomy, client-ID generation, capability strings, session manifest
//! I/O, the lock/daemon-file registry, XDG path resolution, and the
//! patch snapshot text format.

pub mod caps;
pub mod error;
pub mod id;
pub mod lockfile;
pub mod manifest;
pub mod patch;
pub mod paths;
pub mod url;

pub use caps::Capabilities;
pub use error::ErrorCode;
pub use manifest::ManifestEntry;
pub use patch::{Patch, PortRef};

/// NSM API version advertised by the server.
pub const API_VERSION_MAJOR: i32 = 1;
/// Minor part of the advertised NSM API version.
pub const API_VERSION_MINOR: i32 = 2;

/// Human-readable server title used in announce replies.
pub const APP_TITLE: &str = "Nsmd 66";
