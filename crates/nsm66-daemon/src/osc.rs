//! The UDP OSC endpoint.
//!
//! Wraps a `tokio` UDP socket with OSC encoding/decoding, the
//! daemon's `osc.udp://host:port/` URL, and the `/reply`–`/error`
//! helpers every handler uses. Source identity is the peer
//! `SocketAddr`; the serialized URL form is derived from it where a
//! URL is needed (lock files, logs, client records).

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rosc::{decoder, encoder, OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;
use tracing::warn;

use nsm66_core::ErrorCode;

const RECV_BUF_LEN: usize = 65_507;

/// A bound OSC/UDP endpoint.
pub struct OscEndpoint {
    socket: UdpSocket,
    url: String,
    queue: VecDeque<(OscMessage, SocketAddr)>,
}

impl OscEndpoint {
    /// Bind to the given UDP port, or a system-assigned one.
    pub async fn bind(port: Option<u16>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port.unwrap_or(0))).await?;
        let local = socket.local_addr()?;
        let url = format!("osc.udp://{}:{}/", hostname(), local.port());
        Ok(Self {
            socket,
            url,
            queue: VecDeque::new(),
        })
    }

    /// The endpoint's `osc.udp://host:port/` URL, as exported to
    /// children via `NSM_URL` and written to lock and daemon files.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.socket.local_addr().map_or(0, |a| a.port())
    }

    /// Fire one message. UDP sends do not block; failures are logged
    /// and dropped, never propagated into handler control flow.
    pub fn send(&self, to: SocketAddr, path: &str, args: Vec<OscType>) {
        let packet = OscPacket::Message(OscMessage {
            addr: path.to_string(),
            args,
        });
        match encoder::encode(&packet) {
            Ok(bytes) => {
                if let Err(err) = self.socket.try_send_to(&bytes, to) {
                    warn!(%to, path, %err, "failed to send OSC message");
                }
            }
            Err(err) => warn!(path, ?err, "failed to encode OSC message"),
        }
    }

    /// `/reply <path> <message>` to the request's source.
    pub fn reply(&self, to: SocketAddr, reply_path: &str, message: &str) {
        self.send(
            to,
            "/reply",
            vec![
                OscType::String(reply_path.to_string()),
                OscType::String(message.to_string()),
            ],
        );
    }

    /// `/error <path> <code> <message>` to the request's source.
    pub fn error(&self, to: SocketAddr, path: &str, code: ErrorCode, message: &str) {
        warn!(path, %code, message, "replying with error");
        self.send(
            to,
            "/error",
            vec![
                OscType::String(path.to_string()),
                OscType::Int(code.value()),
                OscType::String(message.to_string()),
            ],
        );
    }

    /// Receive the next message, waiting up to `timeout`. Bundles are
    /// flattened; undecodable datagrams are logged and skipped.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Option<(OscMessage, SocketAddr)> {
        if let Some(item) = self.queue.pop_front() {
            return Some(item);
        }
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; RECV_BUF_LEN];
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let received =
                tokio::time::timeout(remaining, self.socket.recv_from(&mut buf)).await;
            match received {
                Err(_elapsed) => return None,
                Ok(Err(err)) => {
                    warn!(%err, "OSC receive failed");
                    return None;
                }
                Ok(Ok((len, from))) => {
                    match decoder::decode_udp(&buf[..len]) {
                        Ok((_rest, packet)) => self.enqueue_packet(packet, from),
                        Err(err) => warn!(%from, ?err, "dropping undecodable datagram"),
                    }
                    if let Some(item) = self.queue.pop_front() {
                        return Some(item);
                    }
                }
            }
        }
    }

    /// Receive the next message, waiting indefinitely.
    pub async fn recv(&mut self) -> std::io::Result<(OscMessage, SocketAddr)> {
        if let Some(item) = self.queue.pop_front() {
            return Ok(item);
        }
        let mut buf = [0u8; RECV_BUF_LEN];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            match decoder::decode_udp(&buf[..len]) {
                Ok((_rest, packet)) => self.enqueue_packet(packet, from),
                Err(err) => warn!(%from, ?err, "dropping undecodable datagram"),
            }
            if let Some(item) = self.queue.pop_front() {
                return Ok(item);
            }
        }
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

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

pub use nsm66_core::url::{format_osc_url as url_of, parse_osc_url};

/// The type tag string of a message's arguments, used for dispatch.
#[must_use]
pub fn typespec(msg: &OscMessage) -> String {
    msg.args
        .iter()
        .map(|arg| match arg {
            OscType::String(_) => 's',
            OscType::Int(_) => 'i',
            OscType::Float(_) => 'f',
            OscType::Double(_) => 'd',
            OscType::Long(_) => 'h',
            OscType::Blob(_) => 'b',
            OscType::Bool(true) => 'T',
            OscType::Bool(false) => 'F',
            _ => '?',
        })
        .collect()
}

#[must_use]
pub fn str_arg(msg: &OscMessage, index: usize) -> Option<&str> {
    match msg.args.get(index) {
        Some(OscType::String(s)) => Some(s),
        _ => None,
    }
}

#[must_use]
pub fn int_arg(msg: &OscMessage, index: usize) -> Option<i32> {
    match msg.args.get(index) {
        Some(OscType::Int(i)) => Some(*i),
        _ => None,
    }
}

#[must_use]
pub fn float_arg(msg: &OscMessage, index: usize) -> Option<f32> {
    match msg.args.get(index) {
        Some(OscType::Float(f)) => Some(*f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typespec_covers_the_wire_types() {
        let msg = OscMessage {
            addr: "/x".to_string(),
            args: vec![
                OscType::String("a".to_string()),
                OscType::Int(1),
                OscType::Float(0.5),
            ],
        };
        assert_eq!(typespec(&msg), "sif");
    }

    #[test]
    fn url_parsing_round_trip() {
        let addr: SocketAddr = "127.0.0.1:7777".parse().unwrap();
        assert_eq!(url_of(addr), "osc.udp://127.0.0.1:7777/");
        assert_eq!(parse_osc_url("osc.udp://127.0.0.1:7777/"), Some(addr));
        assert_eq!(parse_osc_url("127.0.0.1:7777"), Some(addr));
        assert_eq!(parse_osc_url("not a url"), None);
    }

    #[tokio::test]
    async fn messages_round_trip_between_endpoints() {
        let mut a = OscEndpoint::bind(None).await.unwrap();
        let b = OscEndpoint::bind(None).await.unwrap();
        let a_addr: SocketAddr = format!("127.0.0.1:{}", a.local_port()).parse().unwrap();

        b.send(
            a_addr,
            "/osc/ping",
            vec![OscType::String("hello".to_string())],
        );
        let (msg, from) = a
            .recv_timeout(Duration::from_secs(5))
            .await
            .expect("message should arrive");
        assert_eq!(msg.addr, "/osc/ping");
        assert_eq!(str_arg(&msg, 0), Some("hello"));
        assert_eq!(from.port(), b.local_port());
    }

    #[tokio::test]
    async fn recv_timeout_expires_quietly() {
        let mut a = OscEndpoint::bind(None).await.unwrap();
        let got = a.recv_timeout(Duration::from_millis(50)).await;
        assert!(got.is_none());
    }
}
