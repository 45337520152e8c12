//! The GUI view projector.
//!
//! At most one observing GUI is attached. Every client-visible state
//! change is pushed as one of the `/nsm/gui/client/*` messages and
//! session transitions as `/nsm/gui/session/*`; free-form narration
//! goes to `/nsm/gui/server/message`. When a GUI attaches, the current
//! client table and session are replayed so a late-arriving GUI sees a
//! consistent view.

use std::net::SocketAddr;

use rosc::OscType;
use tracing::info;

use nsm66_core::caps::CAP_OPTIONAL_GUI;

use crate::client::ClientStatus;
use crate::daemon::Daemon;

/// The attached GUI, if any.
#[derive(Debug, Default)]
pub struct GuiLink {
    pub(crate) addr: Option<SocketAddr>,
}

impl GuiLink {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.addr.is_some()
    }
}

impl Daemon {
    pub(crate) fn gui_send(&self, path: &str, args: Vec<OscType>) {
        if let Some(addr) = self.gui.addr {
            self.osc.send(addr, path, args);
        }
    }

    /// Narration line shown in the GUI's status area.
    pub(crate) fn gui_server_message(&self, text: &str) {
        self.gui_send(
            "/nsm/gui/server/message",
            vec![OscType::String(text.to_string())],
        );
    }

    pub(crate) fn gui_client_new(&self, client_id: &str, name: &str) {
        self.gui_send(
            "/nsm/gui/client/new",
            vec![
                OscType::String(client_id.to_string()),
                OscType::String(name.to_string()),
            ],
        );
    }

    pub(crate) fn gui_client_status(&self, client_id: &str, status: ClientStatus) {
        self.gui_send(
            "/nsm/gui/client/status",
            vec![
                OscType::String(client_id.to_string()),
                OscType::String(status.as_str().to_string()),
            ],
        );
    }

    pub(crate) fn gui_client_label(&self, client_id: &str, label: &str) {
        self.gui_send(
            "/nsm/gui/client/label",
            vec![
                OscType::String(client_id.to_string()),
                OscType::String(label.to_string()),
            ],
        );
    }

    pub(crate) fn gui_client_dirty(&self, client_id: &str, dirty: bool) {
        self.gui_send(
            "/nsm/gui/client/dirty",
            vec![
                OscType::String(client_id.to_string()),
                OscType::Int(i32::from(dirty)),
            ],
        );
    }

    pub(crate) fn gui_client_progress(&self, client_id: &str, progress: f32) {
        self.gui_send(
            "/nsm/gui/client/progress",
            vec![
                OscType::String(client_id.to_string()),
                OscType::Float(progress),
            ],
        );
    }

    pub(crate) fn gui_client_gui_visible(&self, client_id: &str, visible: bool) {
        self.gui_send(
            "/nsm/gui/client/gui_visible",
            vec![
                OscType::String(client_id.to_string()),
                OscType::Int(i32::from(visible)),
            ],
        );
    }

    pub(crate) fn gui_client_switch(&self, old_id: &str, new_id: &str) {
        self.gui_send(
            "/nsm/gui/client/switch",
            vec![
                OscType::String(old_id.to_string()),
                OscType::String(new_id.to_string()),
            ],
        );
    }

    pub(crate) fn gui_client_has_optional_gui(&self, client_id: &str) {
        self.gui_send(
            "/nsm/gui/client/has_optional_gui",
            vec![OscType::String(client_id.to_string())],
        );
    }

    /// Session name plus root-relative path; two empty strings signal
    /// that no session is open.
    pub(crate) fn gui_session_name(&self, name: &str, relative_path: &str) {
        self.gui_send(
            "/nsm/gui/session/name",
            vec![
                OscType::String(name.to_string()),
                OscType::String(relative_path.to_string()),
            ],
        );
    }

    pub(crate) fn gui_session_session(&self, name: &str) {
        self.gui_send(
            "/nsm/gui/session/session",
            vec![OscType::String(name.to_string())],
        );
    }

    fn gui_session_root(&self) {
        self.gui_send(
            "/nsm/gui/session/root",
            vec![OscType::String(self.session_root.display().to_string())],
        );
    }

    /// Register a GUI and replay the current state to it.
    ///
    /// `is_reply` distinguishes a GUI that announced itself (the
    /// normal case) from a GUI the daemon was pointed at via
    /// `--gui-url`, which gets `server_announce` instead.
    pub fn announce_gui(&mut self, addr: SocketAddr, is_reply: bool) {
        info!(%addr, "GUI announced");
        self.gui.addr = Some(addr);
        if is_reply {
            self.gui_send("/nsm/gui/gui_announce", vec![OscType::String("hi".into())]);
        } else {
            self.gui_send(
                "/nsm/gui/server_announce",
                vec![OscType::String("hi".into())],
            );
        }
        self.gui_session_root();
        let Some(session) = self.session.as_ref() else {
            info!("informing GUI that no session is running");
            self.gui_session_name("", "");
            return;
        };
        let session_name = session.name.clone();
        let relative = session.relative_to(&self.session_root);

        // Clients first, then the session name: the order GUIs expect.
        // `client/new` is sent twice for announced clients, first with
        // the executable and then upgraded with the self-reported
        // name, so the GUI can infer launch data (icons) either way.
        info!(count = self.clients.len(), "replaying client table to GUI");
        for c in self.clients.iter() {
            self.gui_client_new(&c.client_id, &c.exe_path);
            if let Some(status) = c.status {
                self.gui_client_status(&c.client_id, status);
            }
            if c.is_capable_of(CAP_OPTIONAL_GUI) {
                self.gui_client_has_optional_gui(&c.client_id);
            }
            if !c.label.is_empty() {
                self.gui_client_label(&c.client_id, &c.label);
            }
            if c.active {
                self.gui_client_new(&c.client_id, &c.name);
            }
        }
        self.gui_session_name(&session_name, &relative);
        info!("registration with GUI complete");
    }
}
