//! Per-client records.
//!
//! A [`Client`] tracks one managed process from launch (or
//! outside-started announce) through save/switch/quit to removal. The
//! record starts with the executable basename as its name; a successful
//! announce replaces that with the client's self-reported name, which
//! must be treated as unrelated from then on.

use std::net::SocketAddr;
use std::time::Instant;

use nsm66_core::Capabilities;

/// The outstanding request awaiting a client reply; at most one per
/// client. Anything other than `None` means a reply is pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PendingCommand {
    #[default]
    None,
    Start,
    Open,
    Save,
    Quit,
    Kill,
    Duplicate,
    New,
    Close,
}

impl std::fmt::Display for PendingCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Start => "start",
            Self::Open => "open",
            Self::Save => "save",
            Self::Quit => "quit",
            Self::Kill => "kill",
            Self::Duplicate => "duplicate",
            Self::New => "new",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

/// Client status as projected to the GUI.
///
/// The NSM GUI protocol treats `stopped` as the only removable state,
/// so a failed launch is also reported as `stopped` with the label
/// carrying the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Launch,
    Open,
    Ready,
    Save,
    Switch,
    Stopped,
    Quit,
    Removed,
    Error,
    Noop,
}

impl ClientStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Launch => "launch",
            Self::Open => "open",
            Self::Ready => "ready",
            Self::Save => "save",
            Self::Switch => "switch",
            Self::Stopped => "stopped",
            Self::Quit => "quit",
            Self::Removed => "removed",
            Self::Error => "error",
            Self::Noop => "noop",
        }
    }
}

impl std::fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One managed client process.
#[derive(Debug, Clone)]
pub struct Client {
    /// Reported client name; initially the executable basename.
    pub name: String,
    /// Executable used to launch the client.
    pub exe_path: String,
    /// Durable short ID of the form `nWXYZ`.
    pub client_id: String,
    /// Source address learned from the announce message.
    pub addr: Option<SocketAddr>,
    /// Reconstructed `osc.udp://…/` URL of the source address.
    pub url: Option<String>,
    /// OS process ID; `None` while not running.
    pub pid: Option<u32>,
    /// Capabilities advertised at announce time; empty for dumb clients.
    pub capabilities: Capabilities,
    /// Last self-reported progress in [0, 1].
    pub progress: f32,
    /// True once the announce handshake has been accepted.
    pub active: bool,
    /// Client self-reported unsaved-changes flag.
    pub dirty: bool,
    /// Set on surviving clients while a switch-based load runs.
    pub pre_existing: bool,
    /// Optional-GUI visibility as last reported.
    pub gui_visible: bool,
    /// Free-form label shown by the GUI.
    pub label: String,
    /// Projected status; empty until the first transition.
    pub status: Option<ClientStatus>,
    /// The last launch attempt failed (exec error, missing binary).
    pub launch_error: bool,

    reply_errcode: i32,
    reply_message: String,
    pending: PendingCommand,
    command_sent_at: Option<Instant>,
}

impl Client {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        exe_path: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            exe_path: exe_path.into(),
            client_id: client_id.into(),
            addr: None,
            url: None,
            pid: None,
            capabilities: Capabilities::default(),
            progress: 0.0,
            active: false,
            dirty: false,
            pre_existing: false,
            gui_visible: true,
            label: String::new(),
            status: None,
            launch_error: false,
            reply_errcode: 0,
            reply_message: String::new(),
            pending: PendingCommand::None,
            command_sent_at: None,
        }
    }

    /// `name.id`, the full client identity used in `/nsm/client/open`.
    #[must_use]
    pub fn name_with_id(&self) -> String {
        format!("{}.{}", self.name, self.client_id)
    }

    #[must_use]
    pub const fn pending(&self) -> PendingCommand {
        self.pending
    }

    /// Issue a command: records the send time for reply latency logs.
    pub fn set_pending(&mut self, command: PendingCommand) {
        self.command_sent_at = Some(Instant::now());
        self.pending = command;
    }

    pub fn clear_pending(&mut self) {
        self.pending = PendingCommand::None;
    }

    #[must_use]
    pub fn reply_pending(&self) -> bool {
        self.pending != PendingCommand::None
    }

    /// Milliseconds since the pending command was issued.
    #[must_use]
    pub fn ms_since_last_command(&self) -> f64 {
        self.command_sent_at
            .map_or(0.0, |sent| sent.elapsed().as_secs_f64() * 1000.0)
    }

    pub fn set_reply(&mut self, errcode: i32, message: impl Into<String>) {
        self.reply_errcode = errcode;
        self.reply_message = message.into();
    }

    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.reply_errcode != 0
    }

    #[must_use]
    pub const fn reply_errcode(&self) -> i32 {
        self.reply_errcode
    }

    #[must_use]
    pub fn reply_message(&self) -> &str {
        &self.reply_message
    }

    /// A dumb client reported no capabilities and never announced.
    #[must_use]
    pub fn is_dumb(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// `capability` must be enclosed in colons, as in `":switch:"`.
    #[must_use]
    pub fn is_capable_of(&self, capability: &str) -> bool {
        self.capabilities.is_capable_of(capability)
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.pid.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_client_is_inactive_and_idle() {
        let c = Client::new("seq66", "qseq66", "nWXYZ");
        assert!(!c.active);
        assert!(!c.is_running());
        assert!(!c.reply_pending());
        assert!(c.is_dumb());
        assert_eq!(c.name_with_id(), "seq66.nWXYZ");
    }

    #[test]
    fn pending_command_round_trip() {
        let mut c = Client::new("seq66", "qseq66", "nWXYZ");
        c.set_pending(PendingCommand::Save);
        assert!(c.reply_pending());
        assert_eq!(c.pending(), PendingCommand::Save);

        c.clear_pending();
        assert!(!c.reply_pending());
    }

    #[test]
    fn reply_error_state() {
        let mut c = Client::new("seq66", "qseq66", "nWXYZ");
        assert!(!c.has_error());
        c.set_reply(-1, "save failed");
        assert!(c.has_error());
        assert_eq!(c.reply_message(), "save failed");

        c.set_reply(0, "ok");
        assert!(!c.has_error());
    }
}
