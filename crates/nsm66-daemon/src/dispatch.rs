//! OSC message routing.
//!
//! One static mapping from `(path, type signature)` to handler over
//! four surfaces: the server control surface, the client protocol
//! surface, the GUI control surface, and `/osc/ping`. Unknown paths
//! with well-formed payloads are logged at warn level and count as
//! handled.
//!
//! While an orchestration operation is in flight its wait loops pump
//! only the client surface through [`Daemon::dispatch_pumped`]; any
//! server or GUI request arriving in that window is answered with
//! `operation_pending` rather than dispatched re-entrantly.

use std::net::SocketAddr;

use rosc::{OscMessage, OscType};
use tracing::{info, warn};

use nsm66_core::caps::{CAP_OPTIONAL_GUI, SERVER_CAPS};
use nsm66_core::{Capabilities, ErrorCode, API_VERSION_MAJOR, APP_TITLE};

use crate::client::{Client, ClientStatus, PendingCommand};
use crate::daemon::Daemon;
use crate::osc::{self, float_arg, int_arg, str_arg, typespec};

impl Daemon {
    /// Route one inbound message. Handlers run to completion without
    /// interleaving; only the orchestration ops suspend, and those
    /// pump nested messages through the restricted dispatcher.
    pub async fn dispatch(&mut self, msg: OscMessage, from: SocketAddr) {
        if self.dispatch_client_surface(&msg, from) {
            return;
        }
        let spec = typespec(&msg);
        match (msg.addr.as_str(), spec.as_str()) {
            ("/nsm/server/add", "s") => self.handle_add(&msg, from),
            ("/nsm/server/save", "") => self.op_save(from, &msg.addr).await,
            ("/nsm/server/open", "s") => self.op_open(&msg, from).await,
            ("/nsm/server/new", "s") => self.op_new(&msg, from).await,
            ("/nsm/server/duplicate", "s") => self.op_duplicate(&msg, from).await,
            ("/nsm/server/list", "") => self.handle_list(from, &msg.addr),
            ("/nsm/server/close", "") => self.op_close(from, &msg.addr).await,
            ("/nsm/server/abort", "") => self.op_abort(from, &msg.addr).await,
            ("/nsm/server/quit", "") => self.op_quit().await,
            ("/nsm/server/broadcast", _) => self.handle_broadcast(&msg, from),
            ("/nsm/gui/gui_announce", _) => self.announce_gui(from, true),
            ("/nsm/gui/client/stop", "s") => self.gui_stop(&msg),
            ("/nsm/gui/client/remove", "s") => self.gui_remove(&msg),
            ("/nsm/gui/client/resume", "s") => self.gui_resume(&msg),
            ("/nsm/gui/client/save", "s") => self.gui_client_save(&msg),
            ("/nsm/gui/client/show_optional_gui", "s") => {
                self.gui_optional_gui(&msg, true);
            }
            ("/nsm/gui/client/hide_optional_gui", "s") => {
                self.gui_optional_gui(&msg, false);
            }
            _ => handle_unknown(&msg, &spec),
        }
    }

    /// Restricted routing used inside wait loops: the client surface
    /// is live, everything else is refused with `operation_pending`.
    pub(crate) fn dispatch_pumped(&mut self, msg: OscMessage, from: SocketAddr) {
        if self.dispatch_client_surface(&msg, from) {
            return;
        }
        if msg.addr.starts_with("/nsm/server/") || msg.addr.starts_with("/nsm/gui/") {
            self.osc.error(
                from,
                &msg.addr,
                ErrorCode::OperationPending,
                "An operation pending",
            );
            return;
        }
        handle_unknown(&msg, &typespec(&msg));
    }

    /// The always-available surface: announce, reply/error
    /// correlation, client info messages and ping. Returns `true` when
    /// the message was consumed.
    fn dispatch_client_surface(&mut self, msg: &OscMessage, from: SocketAddr) -> bool {
        let spec = typespec(msg);
        match (msg.addr.as_str(), spec.as_str()) {
            ("/nsm/server/announce", "sssiii") => self.handle_announce(msg, from),
            ("/reply", "ss") => self.handle_reply(msg, from),
            ("/error", "sis") => self.handle_client_error(msg, from),
            ("/nsm/client/progress", "f") => self.handle_progress(msg, from),
            ("/nsm/client/is_dirty", "") => self.handle_dirty(from, true),
            ("/nsm/client/is_clean", "") => self.handle_dirty(from, false),
            ("/nsm/client/message", "is") => self.handle_client_message(msg, from),
            ("/nsm/client/label", "s") => self.handle_label(msg, from),
            ("/nsm/client/gui_is_shown", "") => self.handle_gui_visibility(from, true),
            ("/nsm/client/gui_is_hidden", "") => self.handle_gui_visibility(from, false),
            ("/osc/ping", "") => {
                self.osc
                    .send(from, "/reply", vec![OscType::String(msg.addr.clone())]);
            }
            _ => return false,
        }
        true
    }

    /// `/nsm/server/announce`: accept a client into the session.
    ///
    /// A client the daemon launched itself is matched by executable
    /// against records still pending `start`; anything else is an
    /// outside-started client and gets a fresh record. Either way the
    /// record only becomes *active* here, and `/nsm/client/open`
    /// follows immediately.
    fn handle_announce(&mut self, msg: &OscMessage, from: SocketAddr) {
        let (Some(client_name), Some(caps), Some(exe), Some(major), Some(minor), Some(pid)) = (
            str_arg(msg, 0),
            str_arg(msg, 1),
            str_arg(msg, 2),
            int_arg(msg, 3),
            int_arg(msg, 4),
            int_arg(msg, 5),
        ) else {
            return;
        };
        self.gui_server_message(&format!("Announce from {client_name}"));
        info!(client_name, exe, major, minor, pid, "announce");
        let Some((session_path, session_name)) = self
            .session
            .as_ref()
            .map(|s| (s.path.clone(), s.name.clone()))
        else {
            self.osc.error(
                from,
                &msg.addr,
                ErrorCode::NoSessionOpen,
                "No session open for this application to join",
            );
            return;
        };

        let expected = self.clients.iter().position(|c| {
            c.exe_path == exe && !c.active && c.pending() == PendingCommand::Start
        });
        if major > API_VERSION_MAJOR {
            warn!(
                client_name,
                major, minor, "client is using an incompatible, more recent API version"
            );
            self.osc.error(
                from,
                &msg.addr,
                ErrorCode::IncompatibleApi,
                "Server is using an incompatible API version",
            );
            return;
        }

        let index = match expected {
            Some(index) => {
                info!(client_name, "client was expected");
                index
            }
            None => {
                let id = self.clients.generate_id();
                self.clients.push(Client::new("", exe, id))
            }
        };
        let (client_id, full_id, project_path, optional_gui) = {
            let Some(c) = self.clients.get_mut(index) else {
                return;
            };
            c.pid = Some(pid as u32);
            c.capabilities = Capabilities::new(caps);
            c.addr = Some(from);
            c.url = Some(osc::url_of(from));
            // From here on the name is the client's self-reported one,
            // unrelated to the executable.
            c.name = client_name.to_string();
            c.active = true;
            c.status = Some(ClientStatus::Open);
            c.set_pending(PendingCommand::Open);
            let project = session_path.join(format!("{}.{}", c.name, c.client_id));
            (
                c.client_id.clone(),
                c.name_with_id(),
                project.display().to_string(),
                c.is_capable_of(CAP_OPTIONAL_GUI),
            )
        };
        info!(%full_id, pid, url = %osc::url_of(from), "client is ready to receive commands");

        let ack = if expected.is_some() {
            "Ack'ed as NSM client (started ourselves)"
        } else {
            "Ack'ed as NSM client (registered itself from the outside)"
        };
        self.osc.send(
            from,
            "/reply",
            vec![
                OscType::String(msg.addr.clone()),
                OscType::String(ack.to_string()),
                OscType::String(APP_TITLE.to_string()),
                OscType::String(SERVER_CAPS.to_string()),
            ],
        );
        self.gui_client_new(&client_id, client_name);
        self.gui_client_status(&client_id, ClientStatus::Open);
        if optional_gui {
            self.gui_client_has_optional_gui(&client_id);
        }

        self.osc.send(
            from,
            "/nsm/client/open",
            vec![
                OscType::String(project_path),
                OscType::String(session_name),
                OscType::String(full_id),
            ],
        );
    }

    fn handle_reply(&mut self, msg: &OscMessage, from: SocketAddr) {
        let message = str_arg(msg, 1).unwrap_or_default().to_string();
        let Some(index) = self.clients.position_by_addr(from) else {
            warn!(%from, "reply from unknown client");
            return;
        };
        let client_id = {
            let Some(c) = self.clients.get_mut(index) else {
                return;
            };
            c.set_reply(ErrorCode::Ok.value(), message.clone());
            info!(
                client = %c.name_with_id(),
                %message,
                elapsed_ms = c.ms_since_last_command(),
                "client replied"
            );
            c.clear_pending();
            c.status = Some(ClientStatus::Ready);
            c.client_id.clone()
        };
        self.gui_client_status(&client_id, ClientStatus::Ready);
    }

    fn handle_client_error(&mut self, msg: &OscMessage, from: SocketAddr) {
        let errcode = int_arg(msg, 1).unwrap_or(ErrorCode::General.value());
        let message = str_arg(msg, 2).unwrap_or_default().to_string();
        let Some(index) = self.clients.position_by_addr(from) else {
            warn!(%from, "error from unknown client");
            return;
        };
        let client_id = {
            let Some(c) = self.clients.get_mut(index) else {
                return;
            };
            c.set_reply(errcode, message.clone());
            warn!(
                client = %c.name_with_id(),
                errcode,
                %message,
                elapsed_ms = c.ms_since_last_command(),
                "client replied with error"
            );
            c.clear_pending();
            c.status = Some(ClientStatus::Error);
            c.client_id.clone()
        };
        self.gui_client_status(&client_id, ClientStatus::Error);
    }

    fn handle_progress(&mut self, msg: &OscMessage, from: SocketAddr) {
        let Some(progress) = float_arg(msg, 0) else {
            return;
        };
        if let Some(index) = self.clients.position_by_addr(from) {
            let client_id = {
                let Some(c) = self.clients.get_mut(index) else {
                    return;
                };
                c.progress = progress;
                c.client_id.clone()
            };
            self.gui_client_progress(&client_id, progress);
        }
    }

    fn handle_dirty(&mut self, from: SocketAddr, dirty: bool) {
        if let Some(index) = self.clients.position_by_addr(from) {
            let client_id = {
                let Some(c) = self.clients.get_mut(index) else {
                    return;
                };
                c.dirty = dirty;
                c.client_id.clone()
            };
            info!(client_id, dirty, "client dirtiness changed");
            self.gui_client_dirty(&client_id, dirty);
        }
    }

    fn handle_gui_visibility(&mut self, from: SocketAddr, visible: bool) {
        if let Some(index) = self.clients.position_by_addr(from) {
            let client_id = {
                let Some(c) = self.clients.get_mut(index) else {
                    return;
                };
                c.gui_visible = visible;
                c.client_id.clone()
            };
            self.gui_client_gui_visible(&client_id, visible);
        }
    }

    fn handle_label(&mut self, msg: &OscMessage, from: SocketAddr) {
        let label = str_arg(msg, 0).unwrap_or_default().to_string();
        if let Some(index) = self.clients.position_by_addr(from) {
            let client_id = {
                let Some(c) = self.clients.get_mut(index) else {
                    return;
                };
                c.label = label.clone();
                c.client_id.clone()
            };
            self.gui_client_label(&client_id, &label);
        }
    }

    /// Relay a client's priority+text message to the GUI.
    fn handle_client_message(&mut self, msg: &OscMessage, from: SocketAddr) {
        let (Some(priority), Some(text)) = (int_arg(msg, 0), str_arg(msg, 1)) else {
            return;
        };
        if let Some(index) = self.clients.position_by_addr(from) {
            if let Some(c) = self.clients.get(index) {
                let client_id = c.client_id.clone();
                self.gui_send(
                    "/nsm/gui/client/message",
                    vec![
                        OscType::String(client_id),
                        OscType::Int(priority),
                        OscType::String(text.to_string()),
                    ],
                );
            }
        }
    }

    /// Constrained cross-client relay. NSM paths never leave the
    /// daemon this way; that rule is what keeps a client from driving
    /// the server or its peers through the relay.
    fn handle_broadcast(&mut self, msg: &OscMessage, from: SocketAddr) {
        let Some(target) = str_arg(msg, 0) else {
            return;
        };
        if target.starts_with("/nsm/") {
            // Accepted but never relayed, so no feedback loop can form.
            info!(target, "suppressing broadcast to a reserved path");
            return;
        }
        let target = target.to_string();
        let args = broadcast_args(&msg.args[1..]);
        let recipients: Vec<SocketAddr> = self
            .clients
            .iter()
            .filter_map(|c| c.addr)
            .filter(|&addr| addr != from)
            .collect();
        for addr in recipients {
            self.osc.send(addr, &target, args.clone());
        }
        // Relay to an attached GUI as well so the broadcast can reach
        // another daemon instance, unless the GUI was the sender.
        if let Some(gui_addr) = self.gui.addr {
            if gui_addr != from {
                let mut gui_args = vec![OscType::String(target)];
                gui_args.extend(args);
                self.osc.send(gui_addr, &msg.addr, gui_args);
            }
        }
    }

    fn gui_stop(&mut self, msg: &OscMessage) {
        let id = str_arg(msg, 0).unwrap_or_default();
        if let Some(index) = self.clients.position_by_id(id) {
            self.command_client_to_stop(index);
            self.gui_send(
                "/reply",
                vec![OscType::String("Client stopped".to_string())],
            );
        } else {
            self.gui_send(
                "/error",
                vec![
                    OscType::Int(-10),
                    OscType::String("No such client.".to_string()),
                ],
            );
        }
    }

    /// Remove a stopped client from the session. Only records with no
    /// process and no announce can go; their save data stays on disk.
    fn gui_remove(&mut self, msg: &OscMessage) {
        let id = str_arg(msg, 0).unwrap_or_default();
        let Some(index) = self.clients.position_by_id(id) else {
            self.gui_send(
                "/error",
                vec![
                    OscType::Int(-10),
                    OscType::String("No such client".to_string()),
                ],
            );
            return;
        };
        let removable = self
            .clients
            .get(index)
            .is_some_and(|c| c.pid.is_none() && !c.active);
        if removable {
            let client_id = {
                let Some(c) = self.clients.get_mut(index) else {
                    return;
                };
                c.status = Some(ClientStatus::Removed);
                c.client_id.clone()
            };
            self.gui_client_status(&client_id, ClientStatus::Removed);
            self.clients.remove_at(index);
            self.gui_send(
                "/reply",
                vec![OscType::String("Client removed".to_string())],
            );
        }
    }

    /// Relaunch a stopped client with its existing ID. Launch-error
    /// records are not retried; the failure would only repeat.
    fn gui_resume(&mut self, msg: &OscMessage) {
        let id = str_arg(msg, 0).unwrap_or_default();
        if let Some(index) = self.clients.position_by_id(id) {
            let Some(c) = self.clients.get(index) else {
                return;
            };
            if c.pid.is_none() && !c.active {
                if c.launch_error {
                    info!(client = %c.name_with_id(), "not resuming a client that failed to launch");
                    return;
                }
                let exe = c.exe_path.clone();
                let client_id = c.client_id.clone();
                self.launch(&exe, Some(&client_id));
            }
        }
    }

    fn gui_client_save(&mut self, msg: &OscMessage) {
        let id = str_arg(msg, 0).unwrap_or_default();
        if let Some(index) = self.clients.position_by_id(id) {
            if self.clients.get(index).is_some_and(|c| c.active) {
                self.command_client_to_save(index);
            }
        }
    }

    fn gui_optional_gui(&mut self, msg: &OscMessage, show: bool) {
        let id = str_arg(msg, 0).unwrap_or_default();
        if let Some(index) = self.clients.position_by_id(id) {
            let Some(c) = self.clients.get(index) else {
                return;
            };
            if c.active {
                if let Some(addr) = c.addr {
                    let path = if show {
                        "/nsm/client/show_optional_gui"
                    } else {
                        "/nsm/client/hide_optional_gui"
                    };
                    self.osc.send(addr, path, vec![]);
                }
            }
        }
    }
}

/// Broadcast relays carry only string, int and float arguments; other
/// OSC types are dropped.
pub(crate) fn broadcast_args(args: &[OscType]) -> Vec<OscType> {
    args.iter()
        .filter(|arg| {
            matches!(
                arg,
                OscType::String(_) | OscType::Int(_) | OscType::Float(_)
            )
        })
        .cloned()
        .collect()
}

fn handle_unknown(msg: &OscMessage, spec: &str) {
    warn!(
        path = %msg.addr,
        types = spec,
        "unrecognized message, reporting as handled"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_forwards_only_simple_types() {
        let args = vec![
            OscType::String("hello".to_string()),
            OscType::Int(3),
            OscType::Blob(vec![1, 2, 3]),
            OscType::Float(0.25),
            OscType::Bool(true),
        ];
        let forwarded = broadcast_args(&args);
        assert_eq!(
            forwarded,
            vec![
                OscType::String("hello".to_string()),
                OscType::Int(3),
                OscType::Float(0.25),
            ]
        );
    }
}
