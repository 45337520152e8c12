//! Session orchestration.
//!
//! The open/new/duplicate/save/close/abort/quit flows, the per-client
//! command fan-outs, and the bounded wait loops they use. At most one
//! orchestration operation runs at a time, enforced by the
//! pending-operation latch; a second request is answered with
//! `operation_pending`.

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use rosc::{OscMessage, OscType};
use tracing::{error, info, warn};

use nsm66_core::caps::CAP_SWITCH;
use nsm66_core::manifest::{self, ManifestEntry, ManifestError};
use nsm66_core::{lockfile, paths, ErrorCode};

use crate::client::{Client, ClientStatus, PendingCommand};
use crate::daemon::{Daemon, Operation, Session};
use crate::osc::str_arg;
use crate::supervisor;

/// Grace period for clients told to quit before SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(10);
/// How long newly launched clients may take to announce.
const ANNOUNCE_GRACE: Duration = Duration::from_secs(5);
/// How long commanded clients may take to reply.
const REPLY_GRACE: Duration = Duration::from_secs(60);
/// Wait-loop slice; exit conditions are rechecked at this cadence.
const WAIT_SLICE: Duration = Duration::from_millis(100);
/// Pause between consecutive launches. liblo-based clients derive
/// their port numbers from the time, so launching too quickly makes
/// them collide on a port.
const LAUNCH_SPACING: Duration = Duration::from_millis(100);

impl Daemon {
    fn begin_operation(&mut self, op: Operation, from: SocketAddr, path: &str) -> bool {
        if self.pending_operation.is_some() {
            self.osc.error(
                from,
                path,
                ErrorCode::OperationPending,
                "An operation pending",
            );
            return false;
        }
        self.pending_operation = Some(op);
        true
    }

    fn end_operation(&mut self) {
        self.pending_operation = None;
    }

    fn current_lock_path(&self) -> Option<PathBuf> {
        self.session
            .as_ref()
            .map(|s| lockfile::lock_file_path(&self.runtime_dir, &s.name, &s.path))
    }

    fn session_exists(&self, name: &str) -> bool {
        self.session_root
            .join(name)
            .join(manifest::SESSION_FILE)
            .is_file()
    }

    /// Serialize the current client table to `session.nsm`.
    fn save_session_file(&mut self) -> Result<(), ManifestError> {
        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        let entries: Vec<ManifestEntry> = self
            .clients
            .iter()
            .map(|c| ManifestEntry::new(c.name.clone(), c.exe_path.clone(), c.client_id.clone()))
            .collect();
        manifest::write(&session.path, &entries)
    }

    /// Launch `executable`, reusing the record with `client_id` if one
    /// exists, creating one otherwise. Returns `false` on spawn
    /// failure, with the record flagged as a launch error.
    pub(crate) fn launch(&mut self, executable: &str, client_id: Option<&str>) -> bool {
        let existing = client_id
            .filter(|id| !id.is_empty())
            .and_then(|id| self.clients.position_by_id(id));
        let index = match existing {
            Some(index) => index,
            None => {
                let id = match client_id.filter(|id| !id.is_empty()) {
                    Some(id) => id.to_string(),
                    None => self.clients.generate_id(),
                };
                self.clients
                    .push(Client::new(exe_basename(executable), executable, id))
            }
        };
        self.gui_server_message(&format!("Launching {executable}"));
        let url = self.osc.url().to_string();
        let client_id = match self.clients.get(index) {
            Some(c) => c.client_id.clone(),
            None => return false,
        };
        match supervisor::spawn_client(executable, &url) {
            Ok(pid) => {
                info!(executable, pid, "process launched");
                if let Some(c) = self.clients.get_mut(index) {
                    c.set_pending(PendingCommand::Start);
                    c.pid = Some(pid);
                    // A previous launch error fixed by the user and
                    // then resumed needs the reset.
                    c.launch_error = false;
                    c.status = Some(ClientStatus::Launch);
                }
                // A second `new` with the self-reported name follows
                // if the client announces.
                self.gui_client_new(&client_id, executable);
                self.gui_client_status(&client_id, ClientStatus::Launch);
                self.gui_client_label(&client_id, "");
                true
            }
            Err(err) => {
                error!(executable, %err, "error starting process");
                if let Some(c) = self.clients.get_mut(index) {
                    c.launch_error = true;
                    c.pid = None;
                    c.status = Some(ClientStatus::Stopped);
                    c.label = "Launch error!".to_string();
                }
                self.gui_client_new(&client_id, executable);
                self.gui_client_status(&client_id, ClientStatus::Stopped);
                self.gui_client_label(&client_id, "Launch error!");
                false
            }
        }
    }

    /// Save fan-out for one client. Active clients get
    /// `/nsm/client/save`; a dumb client with a live process has
    /// nothing to tell, so it is only marked `noop`.
    pub(crate) fn command_client_to_save(&mut self, index: usize) {
        let Some(c) = self.clients.get(index) else {
            return;
        };
        let client_id = c.client_id.clone();
        let name_with_id = c.name_with_id();
        if c.active {
            let Some(addr) = c.addr else {
                return;
            };
            info!(client = %name_with_id, "telling client to save");
            self.osc.send(addr, "/nsm/client/save", vec![]);
            if let Some(c) = self.clients.get_mut(index) {
                c.set_pending(PendingCommand::Save);
                c.status = Some(ClientStatus::Save);
            }
            self.gui_client_status(&client_id, ClientStatus::Save);
        } else if c.is_dumb() && c.is_running() {
            if let Some(c) = self.clients.get_mut(index) {
                c.status = Some(ClientStatus::Noop);
            }
            self.gui_client_status(&client_id, ClientStatus::Noop);
        }
    }

    /// Re-point an already-running `:switch:` client at the current
    /// session. The record's ID changes to the new session's value
    /// *before* `/nsm/client/open` goes out so the project path and
    /// the full ID agree.
    fn command_client_to_switch(&mut self, index: usize, new_client_id: &str) {
        let Some((session_path, session_name)) = self
            .session
            .as_ref()
            .map(|s| (s.path.clone(), s.name.clone()))
        else {
            return;
        };
        let Some(c) = self.clients.get_mut(index) else {
            return;
        };
        let old_client_id = std::mem::replace(&mut c.client_id, new_client_id.to_string());
        let project_path = session_path.join(format!("{}.{}", c.name, c.client_id));
        let full_id = c.name_with_id();
        let Some(addr) = c.addr else {
            return;
        };
        info!(
            client = %full_id,
            project = %project_path.display(),
            "commanding client to switch"
        );
        self.osc.send(
            addr,
            "/nsm/client/open",
            vec![
                OscType::String(project_path.display().to_string()),
                OscType::String(session_name),
                OscType::String(full_id),
            ],
        );
        if let Some(c) = self.clients.get_mut(index) {
            c.set_pending(PendingCommand::Open);
            c.status = Some(ClientStatus::Switch);
        }
        self.gui_client_status(new_client_id, ClientStatus::Switch);
        self.gui_client_switch(&old_client_id, new_client_id);
    }

    /// Ask one client to leave the session. Active clients get
    /// SIGTERM with pending `quit`; a dumb client with no process left
    /// is removed outright.
    pub(crate) fn command_client_to_quit(&mut self, index: usize) {
        let Some(c) = self.clients.get(index) else {
            return;
        };
        let client_id = c.client_id.clone();
        let name_with_id = c.name_with_id();
        let (active, dumb, pid) = (c.active, c.is_dumb(), c.pid);
        info!(client = %name_with_id, "commanding client to quit");
        if active {
            if let Some(c) = self.clients.get_mut(index) {
                c.set_pending(PendingCommand::Quit);
                c.status = Some(ClientStatus::Quit);
            }
            if let Some(pid) = pid {
                if let Err(err) = supervisor::send_signal(pid, Signal::SIGTERM) {
                    warn!(pid, %err, "failed to signal client");
                }
            }
            self.gui_client_status(&client_id, ClientStatus::Quit);
        } else if dumb {
            if let Some(pid) = pid {
                if let Some(c) = self.clients.get_mut(index) {
                    c.set_pending(PendingCommand::Quit);
                    c.status = Some(ClientStatus::Quit);
                }
                self.gui_client_status(&client_id, ClientStatus::Quit);
                if let Err(err) = supervisor::send_signal(pid, Signal::SIGTERM) {
                    warn!(pid, %err, "failed to signal client");
                }
            } else {
                if let Some(c) = self.clients.get_mut(index) {
                    c.status = Some(ClientStatus::Removed);
                }
                self.gui_client_status(&client_id, ClientStatus::Removed);
            }
        }
    }

    /// GUI stop: SIGTERM with pending `kill`, so the record survives
    /// as `stopped` instead of being removed on death.
    pub(crate) fn command_client_to_stop(&mut self, index: usize) {
        let Some(c) = self.clients.get(index) else {
            return;
        };
        let client_id = c.client_id.clone();
        let name_with_id = c.name_with_id();
        let pid = c.pid;
        self.gui_server_message(&format!("Stopping client {name_with_id}"));
        if let Some(pid) = pid {
            if let Some(c) = self.clients.get_mut(index) {
                c.set_pending(PendingCommand::Kill);
                c.status = Some(ClientStatus::Stopped);
            }
            if let Err(err) = supervisor::send_signal(pid, Signal::SIGTERM) {
                warn!(pid, %err, "failed to signal client");
            }
            self.gui_client_status(&client_id, ClientStatus::Stopped);
        }
    }

    /// Drive the endpoint for up to `duration`, dispatching nested
    /// messages through the restricted router and reaping children.
    /// This is the only suspension point inside orchestration flows.
    async fn pump(&mut self, duration: Duration) {
        self.reap();
        let deadline = Instant::now() + duration;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            let received = self.osc.recv_timeout(remaining).await;
            let Some((msg, from)) = received else {
                break;
            };
            self.dispatch_pumped(msg, from);
        }
        self.reap();
        self.purge_dead_clients();
    }

    /// Poll until every record has either announced or failed to
    /// launch, or the grace period lapses. Dumb clients never
    /// announce, so the loop must be able to give up on them.
    async fn wait_for_announce(&mut self) {
        self.gui_server_message("Waiting for announcements from clients");
        let mut responsive = self.clients.responsive_count();
        let mut remaining = ANNOUNCE_GRACE;
        while !remaining.is_zero() {
            remaining = remaining.saturating_sub(WAIT_SLICE);
            self.pump(WAIT_SLICE).await;
            responsive = self.clients.responsive_count();
            if responsive == self.clients.len() {
                break;
            }
        }
        self.gui_server_message(&format!(
            "Done. {responsive} out of {} clients announced (or failed to launch) \
             within the initialization grace period",
            self.clients.len()
        ));
    }

    /// Poll until no client owes a reply, or the grace period lapses.
    async fn wait_for_replies(&mut self) {
        self.gui_server_message("Waiting for clients to reply to commands");
        let mut remaining = REPLY_GRACE;
        while !remaining.is_zero() {
            remaining = remaining.saturating_sub(WAIT_SLICE);
            self.pump(WAIT_SLICE).await;
            if !self.clients.replies_pending() {
                break;
            }
        }
        self.gui_server_message("Done waiting");
    }

    /// Wait out the grace window for clients told to quit or stop,
    /// then SIGKILL the stragglers. A hung client would otherwise
    /// outlive the session invisibly, with its JACK client still open.
    async fn wait_for_killed_clients_to_die(&mut self) {
        info!("waiting up to {}s for killed clients to die", KILL_GRACE.as_secs());
        let mut remaining = KILL_GRACE;
        while !remaining.is_zero() {
            if !self.clients.killed_clients_alive() {
                info!("all clients have died");
                return;
            }
            remaining = remaining.saturating_sub(WAIT_SLICE);
            self.pump(WAIT_SLICE).await;
        }
        warn!("killed clients are still alive");
        let stragglers: Vec<(u32, String)> = self
            .clients
            .iter()
            .filter_map(|c| c.pid.map(|pid| (pid, c.name_with_id())))
            .collect();
        for (pid, name_with_id) in stragglers {
            warn!(client = %name_with_id, pid, "sending SIGKILL");
            if let Err(err) = supervisor::send_signal(pid, Signal::SIGKILL) {
                warn!(pid, %err, "SIGKILL failed");
            }
        }
    }

    /// Drop every record that never announced (or lost its announce),
    /// projecting the removal to the GUI.
    pub(crate) fn purge_inactive_clients(&mut self) {
        let removed: Vec<String> = self
            .clients
            .iter()
            .filter(|c| !c.active)
            .map(|c| c.client_id.clone())
            .collect();
        for client_id in &removed {
            self.gui_client_status(client_id, ClientStatus::Removed);
        }
        self.clients.retain(|c| c.active);
    }

    fn tell_all_clients_session_is_loaded(&self) {
        info!("telling all clients that the session is loaded");
        for c in self.clients.iter() {
            if c.active {
                if let Some(addr) = c.addr {
                    self.osc.send(addr, "/nsm/client/session_is_loaded", vec![]);
                }
            }
        }
    }

    /// Manifest write plus save fan-out. A write-protected manifest
    /// aborts the fan-out: commanding clients to save into a session
    /// that cannot record them would desynchronize the two.
    async fn command_all_clients_to_save(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.gui_server_message("Commanding attached clients to save");
        if let Err(err) = self.save_session_file() {
            self.gui_server_message(
                "The session file is write-protected; \
                 will not forward save command to clients",
            );
            warn!(%err, "aborting client save commands; the session file is not writable");
            return;
        }
        for index in 0..self.clients.len() {
            self.command_client_to_save(index);
        }
        self.wait_for_replies().await;
    }

    /// Quit every client, wait them out, drop the lock and clear the
    /// session. Safe to call with no session open.
    pub(crate) async fn close_session(&mut self) {
        if self.session.is_none() {
            return;
        }
        for index in 0..self.clients.len() {
            self.command_client_to_quit(index);
        }
        self.wait_for_killed_clients_to_die().await;
        self.purge_inactive_clients();
        self.clients.clear();
        if let Some(lock) = self.current_lock_path() {
            match lockfile::delete_lock_file(&lock) {
                Ok(()) => info!(lock = %lock.display(), "deleted lock file"),
                Err(err) => error!(lock = %lock.display(), %err, "failed to delete lock file"),
            }
        }
        if let Some(session) = self.session.take() {
            info!(path = %session.path.display(), "session closed");
        }
        self.gui_session_name("", "");
    }

    /// Load the session at `path`, switching `:switch:`-capable
    /// clients in place and launching the rest.
    async fn load_session(&mut self, path: PathBuf) -> Result<(), ErrorCode> {
        info!(path = %path.display(), "loading session");
        if !manifest::session_file_path(&path).is_file() {
            warn!(path = %path.display(), "request to load a non-existent session");
            return Err(ErrorCode::NoSuchFile);
        }
        if self.session.is_some() {
            // A load on top of an open session is a switch (or a load
            // during duplicate); the old lock goes away first.
            info!("another session is open; switching clients where possible");
            if let Some(lock) = self.current_lock_path() {
                if let Err(err) = lockfile::delete_lock_file(&lock) {
                    warn!(lock = %lock.display(), %err, "failed to delete lock file");
                }
            }
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let lock = lockfile::lock_file_path(&self.runtime_dir, &name, &path);
        if lock.exists() {
            warn!(
                session = %name,
                lock = %lock.display(),
                "session is already loaded and locked by another daemon"
            );
            return Err(ErrorCode::SessionLocked);
        }
        let rows = match manifest::read(&path) {
            Ok(rows) if !rows.is_empty() => rows,
            Ok(_) => return Err(ErrorCode::CreateFailed),
            Err(err) => {
                warn!(%err, "could not read session manifest");
                return Err(ErrorCode::CreateFailed);
            }
        };
        self.session = Some(Session::from_path(path.clone()));

        info!("commanding unneeded and non-switchable clients to quit");
        let mut wanted: HashMap<String, i64> = HashMap::new();
        for row in &rows {
            *wanted.entry(row.name.clone()).or_insert(0) += 1;
        }
        for index in 0..self.clients.len() {
            let (switchable, client_name) = match self.clients.get(index) {
                Some(c) => (c.is_capable_of(CAP_SWITCH), c.name.clone()),
                None => continue,
            };
            // Surplus instances of a needed name quit along with the
            // unwanted and the non-switchable.
            let keep = switchable
                && match wanted.get_mut(&client_name) {
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        true
                    }
                    _ => false,
                };
            if !keep {
                self.command_client_to_quit(index);
            }
        }
        self.wait_for_killed_clients_to_die().await;
        self.purge_inactive_clients();
        for c in self.clients.iter_mut() {
            c.pre_existing = true;
        }

        info!("commanding smart clients to switch");
        for row in &rows {
            // A duplicated session carries rows whose names collide;
            // the exact (name, id) match wins over name-only so JACK
            // client names stay stable across the switch.
            let target = self
                .clients
                .position_by_name_and_id(&row.name, &row.id)
                .or_else(|| self.clients.position_by_name(&row.name));
            let switch_now = target
                .and_then(|i| self.clients.get(i))
                .map_or(false, |c| c.pre_existing && !c.reply_pending());
            if let (Some(index), true) = (target, switch_now) {
                self.command_client_to_switch(index, &row.id);
            } else {
                tokio::time::sleep(LAUNCH_SPACING).await;
                self.launch(&row.exe, Some(&row.id));
            }
        }

        // Clients need time to announce before the open replies start
        // pending, so both loops run back to back.
        self.wait_for_announce().await;
        self.wait_for_replies().await;
        self.tell_all_clients_session_is_loaded();

        if let Err(err) = lockfile::write_lock_file(&lock, &path, self.osc.url()) {
            warn!(lock = %lock.display(), %err, "failed to write lock file");
        }
        info!(path = %path.display(), "session was loaded");
        if let Some(session) = self.session.as_ref() {
            let session_name = session.name.clone();
            let relative = session.relative_to(&self.session_root);
            self.gui_session_name(&session_name, &relative);
        }
        Ok(())
    }

    /// Load a session by name below the session root; used by
    /// `--load-session`.
    pub async fn load_named_session(&mut self, name: &str) -> Result<(), ErrorCode> {
        let path = self.session_root.join(name);
        self.load_session(path).await
    }

    /// `/nsm/server/add`: launch one executable into the session.
    pub(crate) fn handle_add(&mut self, msg: &OscMessage, from: SocketAddr) {
        let Some(exe) = str_arg(msg, 0) else {
            return;
        };
        if self.session.is_none() {
            self.osc.error(
                from,
                &msg.addr,
                ErrorCode::NoSessionOpen,
                "Cannot add to session because no session is loaded",
            );
            return;
        }
        if paths::name_has_path(exe) {
            self.osc.error(
                from,
                &msg.addr,
                ErrorCode::LaunchFailed,
                "Paths not permitted; clients must be in $PATH",
            );
            return;
        }
        let exe = exe.to_string();
        if self.launch(&exe, None) {
            self.osc.reply(from, &msg.addr, "Launched");
        } else {
            self.osc.error(
                from,
                &msg.addr,
                ErrorCode::LaunchFailed,
                "Failed to launch process",
            );
        }
    }

    /// `/nsm/server/save`.
    pub(crate) async fn op_save(&mut self, from: SocketAddr, path: &str) {
        if !self.begin_operation(Operation::Save, from, path) {
            return;
        }
        if self.session.is_none() {
            self.osc
                .error(from, path, ErrorCode::NoSessionOpen, "No session to save");
            self.end_operation();
            return;
        }
        self.command_all_clients_to_save().await;
        self.osc.reply(from, path, "Saved");
        self.end_operation();
    }

    /// `/nsm/server/new`.
    pub(crate) async fn op_new(&mut self, msg: &OscMessage, from: SocketAddr) {
        let Some(name) = str_arg(msg, 0).map(str::to_string) else {
            return;
        };
        let osc_path = msg.addr.clone();
        if !self.begin_operation(Operation::New, from, &osc_path) {
            return;
        }
        if !paths::session_name_is_valid(&name) {
            self.osc
                .error(from, &osc_path, ErrorCode::CreateFailed, "Invalid session name");
            self.end_operation();
            return;
        }
        if self.session_exists(&name) {
            self.osc.error(
                from,
                &osc_path,
                ErrorCode::CreateFailed,
                "Session name already exists",
            );
            self.end_operation();
            return;
        }
        if self.session.is_some() {
            self.command_all_clients_to_save().await;
            self.close_session().await;
        }
        self.gui_server_message(&format!("Creating new session \"{name}\""));
        let session_path = self.session_root.join(&name);
        if let Err(err) = fs::create_dir_all(&session_path) {
            error!(path = %session_path.display(), %err, "could not create session directory");
            self.osc.error(
                from,
                &osc_path,
                ErrorCode::CreateFailed,
                "Could not create session directory",
            );
            self.end_operation();
            return;
        }
        self.session = Some(Session::from_path(session_path));
        if let Some(lock) = self.current_lock_path() {
            if let Some(session) = self.session.as_ref() {
                if let Err(err) =
                    lockfile::write_lock_file(&lock, &session.path, self.osc.url())
                {
                    warn!(lock = %lock.display(), %err, "failed to write lock file");
                }
            }
        }
        self.osc.reply(from, &osc_path, "Created.");
        self.gui_session_session(&name);
        if let Some(session) = self.session.as_ref() {
            let session_name = session.name.clone();
            let relative = session.relative_to(&self.session_root);
            info!(session = %session_name, relative, "informing GUI of the new session");
            self.gui_session_name(&session_name, &relative);
        }
        if let Err(err) = self.save_session_file() {
            warn!(%err, "could not write the new session manifest");
        }
        self.osc.reply(from, &osc_path, "Session created");
        self.end_operation();
    }

    /// `/nsm/server/open`.
    pub(crate) async fn op_open(&mut self, msg: &OscMessage, from: SocketAddr) {
        let Some(name) = str_arg(msg, 0).map(str::to_string) else {
            return;
        };
        let osc_path = msg.addr.clone();
        self.gui_server_message(&format!("Opening session {name}"));
        if !self.begin_operation(Operation::Open, from, &osc_path) {
            return;
        }
        if self.session.is_some() {
            self.command_all_clients_to_save().await;
            if self.clients.have_errors() {
                self.osc.error(
                    from,
                    &osc_path,
                    ErrorCode::General,
                    "Some clients could not save",
                );
                self.end_operation();
                return;
            }
        }
        let session_path = self.session_root.join(&name);
        info!(path = %session_path.display(), "attempting to open");
        match self.load_session(session_path).await {
            Ok(()) => self.osc.reply(from, &osc_path, "Loaded"),
            Err(code) => {
                let message = match code {
                    ErrorCode::CreateFailed => "Could not create session file",
                    ErrorCode::SessionLocked => "Session is locked by another process",
                    ErrorCode::NoSuchFile => "The named session does not exist",
                    _ => "Unknown error",
                };
                self.osc.error(from, &osc_path, code, message);
            }
        }
        info!("done");
        self.end_operation();
    }

    /// `/nsm/server/duplicate`: save, copy the session directory, then
    /// open the copy (which switches clients over).
    pub(crate) async fn op_duplicate(&mut self, msg: &OscMessage, from: SocketAddr) {
        let Some(name) = str_arg(msg, 0).map(str::to_string) else {
            return;
        };
        let osc_path = msg.addr.clone();
        if !self.begin_operation(Operation::Duplicate, from, &osc_path) {
            return;
        }
        let Some(current_path) = self.session.as_ref().map(|s| s.path.clone()) else {
            self.osc
                .error(from, &osc_path, ErrorCode::NoSessionOpen, "No session to save");
            self.end_operation();
            return;
        };
        if !paths::session_name_is_valid(&name) {
            self.osc
                .error(from, &osc_path, ErrorCode::CreateFailed, "Invalid session name");
            self.end_operation();
            return;
        }
        if self.session_exists(&name) {
            self.osc.error(
                from,
                &osc_path,
                ErrorCode::CreateFailed,
                "Session name already exists",
            );
            self.end_operation();
            return;
        }
        self.command_all_clients_to_save().await;
        if self.clients.have_errors() {
            self.osc.error(
                from,
                &osc_path,
                ErrorCode::General,
                "Some clients could not save",
            );
            self.end_operation();
            return;
        }
        let new_path = self.session_root.join(&name);
        if let Err(err) = copy_dir_recursive(&current_path, &new_path) {
            error!(
                from = %current_path.display(),
                to = %new_path.display(),
                %err,
                "could not copy session directory"
            );
        }
        self.gui_session_session(&name);
        info!(path = %new_path.display(), "attempting to open the duplicate");
        // The original session is still open; the load closes it and
        // switches capable clients over.
        if self.load_session(new_path).await.is_ok() {
            self.osc.reply(from, &osc_path, "Loaded");
        } else {
            self.osc
                .error(from, &osc_path, ErrorCode::NoSuchFile, "No such file");
            self.end_operation();
            return;
        }
        self.osc.reply(from, &osc_path, "Duplicated");
        self.end_operation();
    }

    /// `/nsm/server/close`: save, then drain.
    pub(crate) async fn op_close(&mut self, from: SocketAddr, path: &str) {
        if !self.begin_operation(Operation::Close, from, path) {
            return;
        }
        if self.session.is_none() {
            self.osc
                .error(from, path, ErrorCode::NoSessionOpen, "No session to close");
            self.end_operation();
            return;
        }
        self.command_all_clients_to_save().await;
        self.gui_server_message("Commanding clients to close");
        self.close_session().await;
        self.osc.reply(from, path, "Closed");
        self.end_operation();
    }

    /// `/nsm/server/abort`: drain without saving.
    pub(crate) async fn op_abort(&mut self, from: SocketAddr, path: &str) {
        if !self.begin_operation(Operation::Close, from, path) {
            return;
        }
        if self.session.is_none() {
            self.osc
                .error(from, path, ErrorCode::NoSessionOpen, "No session to abort");
            self.end_operation();
            return;
        }
        self.gui_server_message("Commanding clients to quit");
        self.close_session().await;
        self.osc.reply(from, path, "Aborted");
        self.end_operation();
    }

    /// `/nsm/server/quit`: close the session and leave the event loop.
    pub(crate) async fn op_quit(&mut self) {
        self.close_session().await;
        self.should_exit = true;
    }

    /// `/nsm/server/list`: one reply per session below the root, then
    /// an empty-string terminator (no session name can be empty).
    pub(crate) fn handle_list(&mut self, from: SocketAddr, path: &str) {
        self.gui_server_message("Listing sessions");
        for session in list_sessions(&self.session_root) {
            self.osc.send(
                from,
                "/reply",
                vec![OscType::String(path.to_string()), OscType::String(session)],
            );
        }
        self.osc.send(
            from,
            "/reply",
            vec![
                OscType::String(path.to_string()),
                OscType::String(String::new()),
            ],
        );
    }
}

/// Root-relative paths of every session directory below `root`.
///
/// A directory containing `session.nsm` is a session leaf; nothing
/// below it is visited, so a session cannot nest inside another.
#[must_use]
pub fn list_sessions(root: &Path) -> Vec<String> {
    let mut found = Vec::new();
    walk_session_tree(root, root, &mut found);
    found
}

fn walk_session_tree(root: &Path, dir: &Path, found: &mut Vec<String>) {
    // The marker file is checked before any descent, so a session
    // directory prunes its whole subtree.
    if dir.join(manifest::SESSION_FILE).is_file() {
        if let Ok(relative) = dir.strip_prefix(root) {
            let relative = relative.display().to_string();
            if !relative.is_empty() {
                found.push(relative);
            }
        }
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut subdirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_type().map_or(false, |t| t.is_dir()))
        .map(|e| e.path())
        .collect();
    subdirs.sort();
    for sub in subdirs {
        walk_session_tree(root, &sub, found);
    }
}

fn exe_basename(executable: &str) -> &str {
    Path::new(executable)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(executable)
}

/// Copy a session directory tree. Symlinks are not followed.
fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn session_listing_prunes_session_subtrees() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("A/session.nsm"));
        touch(&root.path().join("B/C/session.nsm"));
        touch(&root.path().join("B/D/session.nsm"));
        // A directory below a session must not be reported even if it
        // carries a marker of its own.
        touch(&root.path().join("A/nested/session.nsm"));
        // An empty directory is not a session.
        fs::create_dir_all(root.path().join("empty")).unwrap();

        let mut sessions = list_sessions(root.path());
        sessions.sort();
        assert_eq!(sessions, ["A", "B/C", "B/D"]);
    }

    #[test]
    fn directory_copy_is_recursive() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        touch(&src.path().join("session.nsm"));
        touch(&src.path().join("seq66.nWXYZ/state.ini"));

        let target = dst.path().join("copy");
        copy_dir_recursive(src.path(), &target).unwrap();
        assert!(target.join("session.nsm").is_file());
        assert!(target.join("seq66.nWXYZ/state.ini").is_file());
    }

    #[test]
    fn exe_basename_strips_directories() {
        assert_eq!(exe_basename("/usr/bin/qseq66"), "qseq66");
        assert_eq!(exe_basename("qseq66"), "qseq66");
    }
}
