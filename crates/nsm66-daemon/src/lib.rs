//! nsm66d - session-management daemon.
//!
//! The daemon owns the lifecycle of a *session*: a named collection of
//! audio/MIDI client processes that are launched, ordered to save,
//! switched, or terminated in coordinated fashion. Clients talk to the
//! daemon over OSC/UDP using the NSM protocol paths.
//!
//! The crate is a library plus the `nsm66d` binary so that the OSC
//! surface can be driven directly from integration tests.
//!
//! # Single-threaded, cooperative
//!
//! All state lives in one [`Daemon`](daemon::Daemon) value mutated only
//! from the event loop. Child processes share nothing with the daemon
//! beyond their environment; their exits arrive through a SIGCHLD
//! stream and a non-blocking `waitpid` drain.

pub mod client;
pub mod daemon;
pub mod dispatch;
pub mod gui;
pub mod osc;
pub mod registry;
pub mod session_ops;
pub mod supervisor;

pub use client::{Client, ClientStatus, PendingCommand};
pub use daemon::{Daemon, DaemonConfig, DaemonError, Operation, Session};
pub use registry::ClientRegistry;
