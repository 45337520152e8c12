//! The NSM client surface.
//!
//! jackpatch66 announces itself to the session daemon with the
//! `:switch:` capability and then answers `/nsm/client/open` and
//! `/nsm/client/save`. When `NSM_URL` is not set the runtime daemon
//! files are scanned for a running daemon.

use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::time::Duration;

use rosc::{decoder, encoder, OscMessage, OscPacket, OscType};
use tracing::{info, warn};

use nsm66_core::{lockfile, paths, API_VERSION_MAJOR, API_VERSION_MINOR};

/// Name announced to the session daemon.
pub const CLIENT_NAME: &str = "jackpatch66";

const RECV_BUF_LEN: usize = 65_507;

/// The UDP link to the session daemon.
pub struct NsmLink {
    socket: UdpSocket,
    queue: VecDeque<(OscMessage, SocketAddr)>,
    /// Daemon address, learned at announce time and refined from the
    /// announce reply's source.
    pub daemon: Option<SocketAddr>,
    /// True after the daemon acknowledged the announce.
    pub active: bool,
    /// The `<project>.jackpatch` file of the open session, if any.
    pub project_file: Option<PathBuf>,
}

impl NsmLink {
    /// Bind an ephemeral socket whose receives time out after `poll`.
    pub fn bind(poll: Duration) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(poll))?;
        Ok(Self {
            socket,
            queue: VecDeque::new(),
            daemon: None,
            active: false,
            project_file: None,
        })
    }

    pub fn send(&self, to: SocketAddr, path: &str, args: Vec<OscType>) {
        let packet = OscPacket::Message(OscMessage {
            addr: path.to_string(),
            args,
        });
        match encoder::encode(&packet) {
            Ok(bytes) => {
                if let Err(err) = self.socket.send_to(&bytes, to) {
                    warn!(%to, path, %err, "failed to send OSC message");
                }
            }
            Err(err) => warn!(path, ?err, "failed to encode OSC message"),
        }
    }

    /// `/reply <path> OK` to the daemon.
    pub fn reply_ok(&self, path: &str) {
        if let Some(daemon) = self.daemon {
            self.send(
                daemon,
                "/reply",
                vec![
                    OscType::String(path.to_string()),
                    OscType::String("OK".to_string()),
                ],
            );
        }
    }

    /// `/error <path> <code> <message>` to the daemon.
    pub fn reply_error(&self, path: &str, code: i32, message: &str) {
        if let Some(daemon) = self.daemon {
            self.send(
                daemon,
                "/error",
                vec![
                    OscType::String(path.to_string()),
                    OscType::Int(code),
                    OscType::String(message.to_string()),
                ],
            );
        }
    }

    /// Register with the daemon at `addr`.
    pub fn announce(&mut self, addr: SocketAddr, process_name: &str) {
        info!(%addr, "announcing to NSM");
        self.daemon = Some(addr);
        self.send(
            addr,
            "/nsm/server/announce",
            vec![
                OscType::String(CLIENT_NAME.to_string()),
                OscType::String(":switch:".to_string()),
                OscType::String(process_name.to_string()),
                OscType::Int(API_VERSION_MAJOR),
                OscType::Int(API_VERSION_MINOR),
                OscType::Int(std::process::id() as i32),
            ],
        );
    }

    /// Receive one message, waiting at most the bind-time poll
    /// interval. Bundles are flattened.
    pub fn recv(&mut self) -> Option<(OscMessage, SocketAddr)> {
        if let Some(item) = self.queue.pop_front() {
            return Some(item);
        }
        let mut buf = [0u8; RECV_BUF_LEN];
        let (len, from) = self.socket.recv_from(&mut buf).ok()?;
        match decoder::decode_udp(&buf[..len]) {
            Ok((_rest, packet)) => self.enqueue_packet(packet, from),
            Err(err) => warn!(%from, ?err, "dropping undecodable datagram"),
        }
        self.queue.pop_front()
    }

    fn enqueue_packet(&mut self, packet: OscPacket, from: SocketAddr) {
        match packet {
            OscPacket::Message(msg) => self.queue.push_back((msg, from)),
            OscPacket::Bundle(bundle) => {
                for inner in bundle.content {
                    self.enqueue_packet(inner, from);
                }
            }
        }
    }
}

/// Find a daemon URL: `NSM_URL` first, then the newest `d/<pid>` file
/// of a still-running daemon in the runtime directory.
#[must_use]
pub fn find_daemon_url() -> Option<String> {
    if let Ok(url) = std::env::var("NSM_URL") {
        if !url.is_empty() {
            return Some(url);
        }
    }
    let daemons = lockfile::read_daemon_files(&paths::runtime_dir()).ok()?;
    daemons
        .into_iter()
        .find(|(pid, _)| {
            nix::sys::signal::kill(nix::unistd::Pid::from_raw(*pid as i32), None).is_ok()
        })
        .map(|(_, url)| url)
}

#[must_use]
pub fn str_arg(msg: &OscMessage, index: usize) -> Option<&str> {
    match msg.args.get(index) {
        Some(OscType::String(s)) => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_carries_the_switch_capability() {
        let link = NsmLink::bind(Duration::from_millis(10)).unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap();

        let mut link = link;
        link.announce(addr, "jackpatch66");
        assert_eq!(link.daemon, Some(addr));

        let mut buf = [0u8; 4096];
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        let (_, packet) = decoder::decode_udp(&buf[..len]).unwrap();
        let OscPacket::Message(msg) = packet else {
            panic!("expected a message");
        };
        assert_eq!(msg.addr, "/nsm/server/announce");
        assert_eq!(str_arg(&msg, 0), Some("jackpatch66"));
        assert_eq!(str_arg(&msg, 1), Some(":switch:"));
    }

    #[test]
    fn recv_times_out_quietly() {
        let mut link = NsmLink::bind(Duration::from_millis(20)).unwrap();
        assert!(link.recv().is_none());
    }
}
