//! Access to the live port graph.
//!
//! The patch bay and the snapshot logic only ever see this trait, so
//! they can be exercised against an in-memory graph; the JACK-backed
//! implementation is a thin view over a `jack::Client`.

use tracing::warn;

/// Failure modes of a connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The ports are already connected. Callers treat this as
    /// success: the intent of the saved patch is satisfied.
    AlreadyConnected,
    /// Any other graph error.
    Failed(String),
}

/// The subset of graph operations the patch engine needs.
pub trait PortGraph {
    /// Connect two ports by their full `client:port` names.
    fn connect(&self, src: &str, dst: &str) -> Result<(), ConnectError>;

    /// Full names of every port currently in the graph.
    fn all_ports(&self) -> Vec<String>;

    /// Full names of every output port.
    fn output_ports(&self) -> Vec<String>;

    /// Full names of the ports `output_port` is connected to.
    fn connections_of(&self, output_port: &str) -> Vec<String>;

    /// Whether a port with this full name currently exists.
    fn port_exists(&self, name: &str) -> bool;
}

/// The live JACK graph.
pub struct JackGraph<'a> {
    client: &'a jack::Client,
}

impl<'a> JackGraph<'a> {
    #[must_use]
    pub fn new(client: &'a jack::Client) -> Self {
        Self { client }
    }
}

impl PortGraph for JackGraph<'_> {
    fn connect(&self, src: &str, dst: &str) -> Result<(), ConnectError> {
        match self.client.connect_ports_by_name(src, dst) {
            Ok(()) => Ok(()),
            Err(jack::Error::PortAlreadyConnected(..)) => Err(ConnectError::AlreadyConnected),
            Err(err) => Err(ConnectError::Failed(err.to_string())),
        }
    }

    fn all_ports(&self) -> Vec<String> {
        self.client.ports(None, None, jack::PortFlags::empty())
    }

    fn output_ports(&self) -> Vec<String> {
        self.client.ports(None, None, jack::PortFlags::IS_OUTPUT)
    }

    fn connections_of(&self, output_port: &str) -> Vec<String> {
        let Some(port) = self.client.port_by_name(output_port) else {
            warn!(port = output_port, "JACK port not found");
            return Vec::new();
        };
        self.client
            .ports(None, None, jack::PortFlags::IS_INPUT)
            .into_iter()
            .filter(|input| port.is_connected_to(input).unwrap_or(false))
            .collect()
    }

    fn port_exists(&self, name: &str) -> bool {
        self.client.port_by_name(name).is_some()
    }
}
