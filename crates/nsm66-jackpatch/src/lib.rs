//! jackpatch66 - remember and restore the JACK audio/MIDI graph.
//!
//! A reconnection tracker: it parses a text snapshot of port
//! connections, watches live port registration events through a
//! single-producer single-consumer ring buffer, and restores saved
//! connections as the named ports appear. Normally it runs as an NSM
//! client inside a session; limited standalone modes exist for
//! monitoring and one-shot saves.

pub mod graph;
pub mod notify;
pub mod nsm;
pub mod patchbay;
pub mod snapshot;

pub use graph::{ConnectError, JackGraph, PortGraph};
pub use patchbay::{PatchBay, PatchEntry};
