//! The daemon context and its event loop.
//!
//! Everything the handlers touch — the client registry, the OSC
//! endpoint, the open session, the GUI link, and the pending-operation
//! latch — lives in one [`Daemon`] value threaded through the
//! handlers. The event loop alternates three duties: drain child-exit
//! notifications, wait on the OSC endpoint, and purge clients whose
//! processes disappeared without a signal. A 1 Hz housekeeping tick
//! also watches `getppid()`: a changed parent means the controlling
//! process crashed and the daemon shuts down cleanly.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use nsm66_core::{lockfile, paths};

use crate::client::{ClientStatus, PendingCommand};
use crate::gui::GuiLink;
use crate::osc::{self, OscEndpoint};
use crate::registry::ClientRegistry;
use crate::supervisor::{self, classify_exit, ExitKind, ExitOutcome};

/// Daemon startup and control errors.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// The `--gui-url` argument did not resolve to an address.
    #[error("not a usable GUI URL: {0}")]
    BadGuiUrl(String),

    /// Directory creation, socket binding or signal setup failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Startup configuration resolved from CLI flags and the environment.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Directory holding one subdirectory per session.
    pub session_root: PathBuf,
    /// Runtime directory for lock files and `d/<pid>` daemon files.
    pub runtime_dir: PathBuf,
    /// Fixed UDP port; `None` lets the system assign one.
    pub osc_port: Option<u16>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            session_root: paths::default_session_root(),
            runtime_dir: paths::runtime_dir(),
            osc_port: None,
        }
    }
}

/// The currently open session. At most one session is open at a time.
#[derive(Debug, Clone)]
pub struct Session {
    /// Absolute path below the session root.
    pub path: PathBuf,
    /// Simple name: the final path component.
    pub name: String,
}

impl Session {
    #[must_use]
    pub fn from_path(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name }
    }

    /// The path relative to the session root, as shown to GUIs.
    #[must_use]
    pub fn relative_to(&self, root: &Path) -> String {
        self.path
            .strip_prefix(root)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| self.path.display().to_string())
    }
}

/// The process-wide orchestration latch: at most one of these runs at
/// a time; a second request is answered with `operation_pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Open,
    New,
    Duplicate,
    Save,
    Close,
}

/// All daemon state, mutated only from the event loop.
pub struct Daemon {
    pub(crate) osc: OscEndpoint,
    pub(crate) clients: ClientRegistry,
    pub(crate) session: Option<Session>,
    pub(crate) session_root: PathBuf,
    pub(crate) runtime_dir: PathBuf,
    pub(crate) daemon_file: PathBuf,
    pub(crate) gui: GuiLink,
    pub(crate) pending_operation: Option<Operation>,
    pub(crate) should_exit: bool,
}

impl Daemon {
    /// Create the runtime directories, bind the OSC endpoint and write
    /// the `d/<pid>` daemon file.
    pub async fn new(config: DaemonConfig) -> Result<Self, DaemonError> {
        fs::create_dir_all(&config.runtime_dir)?;
        fs::create_dir_all(&config.session_root)?;
        let osc = OscEndpoint::bind(config.osc_port).await?;
        let daemon_file =
            lockfile::write_daemon_file(&config.runtime_dir, std::process::id(), osc.url())?;
        info!(url = osc.url(), file = %daemon_file.display(), "daemon started");
        Ok(Self {
            osc,
            clients: ClientRegistry::new(),
            session: None,
            session_root: config.session_root,
            runtime_dir: config.runtime_dir,
            daemon_file,
            gui: GuiLink::default(),
            pending_operation: None,
            should_exit: false,
        })
    }

    /// The daemon's OSC URL.
    #[must_use]
    pub fn url(&self) -> &str {
        self.osc.url()
    }

    #[must_use]
    pub fn session_root(&self) -> &Path {
        &self.session_root
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The client record table.
    #[must_use]
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Attach to a running GUI at the given `osc.udp://…/` URL.
    pub fn attach_gui(&mut self, url: &str) -> Result<(), DaemonError> {
        let addr = osc::parse_osc_url(url)
            .ok_or_else(|| DaemonError::BadGuiUrl(url.to_string()))?;
        self.announce_gui(addr, false);
        Ok(())
    }

    /// Run until told to exit, then close the session and clean up.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        let mut sigchld = signal(SignalKind::child())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut housekeeping = tokio::time::interval(Duration::from_secs(1));
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let start_ppid = nix::unistd::getppid();

        enum Event {
            Message(std::io::Result<(rosc::OscMessage, std::net::SocketAddr)>),
            ChildExited,
            Housekeeping,
            ExitSignal(&'static str),
        }

        info!("entering event loop");
        while !self.should_exit {
            // The select only wraps each wake-up into an event; all
            // state mutation happens below, outside the arm futures.
            let event = tokio::select! {
                received = self.osc.recv() => Event::Message(received),
                _ = sigchld.recv() => Event::ChildExited,
                _ = housekeeping.tick() => Event::Housekeeping,
                _ = sighup.recv() => Event::ExitSignal("SIGHUP"),
                _ = sigint.recv() => Event::ExitSignal("SIGINT"),
                _ = sigterm.recv() => Event::ExitSignal("SIGTERM"),
            };
            match event {
                Event::Message(Ok((msg, from))) => self.dispatch(msg, from).await,
                Event::Message(Err(err)) => error!(%err, "OSC receive failed"),
                Event::ChildExited => self.reap(),
                Event::Housekeeping => {
                    self.purge_dead_clients();
                    let ppid = nix::unistd::getppid();
                    if ppid != start_ppid {
                        warn!(
                            %start_ppid, %ppid,
                            "parent PID changed, indicating a possible parent \
                             crash; the user has no control over the session, \
                             trying to shut down cleanly"
                        );
                        self.should_exit = true;
                    }
                }
                Event::ExitSignal(name) => {
                    info!(signal = name, "exit signal received");
                    self.should_exit = true;
                }
            }
        }
        self.shutdown().await;
        Ok(())
    }

    /// The clean-exit path: close the session (quitting all clients
    /// with the usual grace window) and delete the daemon file.
    pub async fn shutdown(&mut self) {
        self.close_session().await;
        match fs::remove_file(&self.daemon_file) {
            Ok(()) => info!(file = %self.daemon_file.display(), "deleted daemon file"),
            Err(err) => warn!(
                file = %self.daemon_file.display(),
                %err,
                "failed to delete daemon file"
            ),
        }
        info!("clean exit");
    }

    /// Drain every child that has exited and update its record.
    pub(crate) fn reap(&mut self) {
        for child in supervisor::reap_children() {
            self.handle_client_exit(child.pid, Some(child.kind));
        }
    }

    /// Purge clients whose processes disappeared without SIGCHLD
    /// (rare, e.g. after parent re-parenting).
    pub(crate) fn purge_dead_clients(&mut self) {
        let pids: Vec<u32> = self.clients.iter().filter_map(|c| c.pid).collect();
        for pid in pids {
            if !supervisor::process_is_running(pid) {
                self.handle_client_exit(pid, None);
            }
        }
    }

    /// Propagate one process exit to its client record.
    ///
    /// A record whose pending command was `quit` is removed outright;
    /// anything else becomes `stopped`, with the label carrying launch
    /// failures to the GUI.
    pub(crate) fn handle_client_exit(&mut self, pid: u32, kind: Option<ExitKind>) {
        let Some(index) = self.clients.position_by_pid(pid) else {
            return;
        };
        let outcome = kind.map(classify_exit);
        let (name_with_id, pending, client_id, had_launch_error) = {
            let Some(c) = self.clients.get(index) else {
                return;
            };
            (
                c.name_with_id(),
                c.pending(),
                c.client_id.clone(),
                c.launch_error,
            )
        };
        let launch_error =
            had_launch_error || outcome == Some(ExitOutcome::LaunchError);

        let told_to_die =
            matches!(pending, PendingCommand::Quit | PendingCommand::Kill);
        if told_to_die {
            self.gui_server_message(&format!("Client {name_with_id} terminated by server"));
        } else {
            self.gui_server_message(&format!("Client {name_with_id} terminated itself"));
        }
        match outcome {
            Some(ExitOutcome::CleanExit) => info!(pid, %name_with_id, "client exited"),
            Some(ExitOutcome::LaunchError) => {
                warn!(pid, %name_with_id, "client could not be started")
            }
            Some(ExitOutcome::Killed) => info!(pid, %name_with_id, "client was killed"),
            Some(ExitOutcome::Crashed) => warn!(pid, %name_with_id, "client crashed"),
            None => warn!(pid, %name_with_id, "client process vanished without a signal"),
        }

        if pending == PendingCommand::Quit {
            if let Some(c) = self.clients.get_mut(index) {
                c.status = Some(ClientStatus::Removed);
            }
            self.gui_client_status(&client_id, ClientStatus::Removed);
            // Removing the record does not touch the client's on-disk
            // save data.
            self.clients.remove_at(index);
        } else {
            let label = if launch_error {
                "Launch error!".to_string()
            } else {
                String::new()
            };
            if let Some(c) = self.clients.get_mut(index) {
                c.launch_error = launch_error;
                c.label = label.clone();
                c.status = Some(ClientStatus::Stopped);
                c.clear_pending();
                c.active = false;
                c.pid = None;
            }
            self.gui_client_label(&client_id, &label);
            self.gui_client_status(&client_id, ClientStatus::Stopped);
        }
    }
}
