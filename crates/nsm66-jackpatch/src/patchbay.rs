//! Saved patches and the known-port set.
//!
//! The patch list holds every saved connection in file order; the
//! known-port set is exactly the ports currently observed live. A
//! saved patch attempts connection only when *both* of its endpoints
//! are known, so a file load alone never produces connect calls; the
//! attempt happens when the second endpoint of a pair appears.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{error, info, warn};

use nsm66_core::patch::{parse_line, Patch, PortRef};

use crate::graph::{ConnectError, PortGraph};

/// One saved connection plus whether it is live in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchEntry {
    pub patch: Patch,
    /// Set after a successful (or already-present) live connection;
    /// cleared when an endpoint unregisters.
    pub active: bool,
}

/// The patch list and the set of live ports.
#[derive(Debug, Default)]
pub struct PatchBay {
    patches: Vec<PatchEntry>,
    known_ports: HashSet<String>,
}

impl PatchBay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn patches(&self) -> &[PatchEntry] {
        &self.patches
    }

    #[must_use]
    pub fn known_ports(&self) -> &HashSet<String> {
        &self.known_ports
    }

    pub fn add_patch(&mut self, patch: Patch) {
        self.patches.push(PatchEntry {
            patch,
            active: false,
        });
    }

    pub fn clear_patches(&mut self) {
        self.patches.clear();
    }

    /// Replace the patch list with the contents of a snapshot file.
    /// Bad lines are logged and skipped; they do not abort the load.
    pub fn load_file(&mut self, file: &Path) -> std::io::Result<()> {
        info!(file = %file.display(), "reading connections");
        let contents = fs::read_to_string(file)?;
        self.clear_patches();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Ok(patches) => {
                    for patch in patches {
                        self.add_patch(patch);
                    }
                }
                Err(err) => warn!(line = index + 1, %err, "bad patch line"),
            }
        }
        Ok(())
    }

    /// A port registered (live event or startup enumeration): remember
    /// it and try every saved patch it participates in.
    pub fn handle_port_appeared(&mut self, port: &str, graph: &dyn PortGraph) {
        self.known_ports.insert(port.to_string());
        info!(port, "new endpoint registered");
        self.connect_matching(port, graph);
    }

    /// A port unregistered: forget it and mark every patch touching it
    /// inactive so a reappearance reconnects.
    pub fn handle_port_vanished(&mut self, port: &str) {
        self.known_ports.remove(port);
        info!(port, "endpoint unregistered");
        let Some(endpoint) = PortRef::parse(port) else {
            return;
        };
        for entry in &mut self.patches {
            if entry.patch.src == endpoint || entry.patch.dst == endpoint {
                entry.active = false;
            }
        }
    }

    /// Feed every port already present in the graph through the
    /// appeared path; used after a file load and on startup.
    pub fn register_existing_ports(&mut self, graph: &dyn PortGraph) {
        for port in graph.all_ports() {
            self.handle_port_appeared(&port, graph);
        }
    }

    fn connect_matching(&mut self, port: &str, graph: &dyn PortGraph) {
        let Some(endpoint) = PortRef::parse(port) else {
            return;
        };
        let known = &self.known_ports;
        for entry in &mut self.patches {
            if entry.patch.src != endpoint && entry.patch.dst != endpoint {
                continue;
            }
            if entry.active {
                continue;
            }
            let src = entry.patch.src.to_string();
            let dst = entry.patch.dst.to_string();
            if !known.contains(&src) || !known.contains(&dst) {
                continue;
            }
            match graph.connect(&src, &dst) {
                Ok(()) | Err(ConnectError::AlreadyConnected) => {
                    info!(%src, %dst, "patch connected");
                    entry.active = true;
                }
                Err(ConnectError::Failed(err)) => {
                    // The patch stays on file; a later registration
                    // retries it.
                    error!(%src, %dst, %err, "JACK connect error");
                    entry.active = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};

    use super::*;

    /// In-memory graph recording every connect attempt.
    #[derive(Default)]
    struct MockGraph {
        ports: HashSet<String>,
        connections: HashMap<String, Vec<String>>,
        connect_calls: RefCell<Vec<(String, String)>>,
        fail_with: Option<ConnectError>,
    }

    impl MockGraph {
        fn with_ports(ports: &[&str]) -> Self {
            Self {
                ports: ports.iter().map(|p| p.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    impl PortGraph for MockGraph {
        fn connect(&self, src: &str, dst: &str) -> Result<(), ConnectError> {
            self.connect_calls
                .borrow_mut()
                .push((src.to_string(), dst.to_string()));
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }

        fn all_ports(&self) -> Vec<String> {
            let mut ports: Vec<String> = self.ports.iter().cloned().collect();
            ports.sort();
            ports
        }

        fn output_ports(&self) -> Vec<String> {
            self.connections.keys().cloned().collect()
        }

        fn connections_of(&self, output_port: &str) -> Vec<String> {
            self.connections
                .get(output_port)
                .cloned()
                .unwrap_or_default()
        }

        fn port_exists(&self, name: &str) -> bool {
            self.ports.contains(name)
        }
    }

    fn bay_with_line(line: &str) -> PatchBay {
        let mut bay = PatchBay::new();
        for patch in parse_line(line).unwrap() {
            bay.add_patch(patch);
        }
        bay
    }

    #[test]
    fn no_connect_until_both_endpoints_are_known() {
        let graph = MockGraph::with_ports(&["seq66:midi_out"]);
        let mut bay = bay_with_line("seq66:midi_out |> fluidsynth:midi_in");

        bay.handle_port_appeared("seq66:midi_out", &graph);
        assert!(graph.connect_calls.borrow().is_empty());
        assert!(!bay.patches()[0].active);

        bay.handle_port_appeared("fluidsynth:midi_in", &graph);
        assert_eq!(
            graph.connect_calls.borrow().as_slice(),
            [(
                "seq66:midi_out".to_string(),
                "fluidsynth:midi_in".to_string()
            )]
        );
        assert!(bay.patches()[0].active);
    }

    #[test]
    fn unregistration_deactivates_and_reappearance_reconnects() {
        let graph = MockGraph::default();
        let mut bay = bay_with_line("seq66:midi_out |> fluidsynth:midi_in");
        bay.handle_port_appeared("seq66:midi_out", &graph);
        bay.handle_port_appeared("fluidsynth:midi_in", &graph);
        assert!(bay.patches()[0].active);

        bay.handle_port_vanished("fluidsynth:midi_in");
        assert!(!bay.patches()[0].active);
        assert!(!bay.known_ports().contains("fluidsynth:midi_in"));
        // One endpoint alone must not trigger a new attempt.
        assert_eq!(graph.connect_calls.borrow().len(), 1);

        bay.handle_port_appeared("fluidsynth:midi_in", &graph);
        assert_eq!(graph.connect_calls.borrow().len(), 2);
        assert!(bay.patches()[0].active);
    }

    #[test]
    fn already_connected_counts_as_success() {
        let mut graph = MockGraph::default();
        graph.fail_with = Some(ConnectError::AlreadyConnected);
        let mut bay = bay_with_line("A:p |> B:q");
        bay.handle_port_appeared("A:p", &graph);
        bay.handle_port_appeared("B:q", &graph);
        assert!(bay.patches()[0].active);
    }

    #[test]
    fn connect_failure_keeps_the_patch() {
        let mut graph = MockGraph::default();
        graph.fail_with = Some(ConnectError::Failed("no such port".to_string()));
        let mut bay = bay_with_line("A:p |> B:q");
        bay.handle_port_appeared("A:p", &graph);
        bay.handle_port_appeared("B:q", &graph);
        assert_eq!(bay.patches().len(), 1);
        assert!(!bay.patches()[0].active);
    }

    #[test]
    fn active_patches_are_not_reconnected() {
        let graph = MockGraph::default();
        let mut bay = bay_with_line("A:p |> B:q");
        bay.handle_port_appeared("A:p", &graph);
        bay.handle_port_appeared("B:q", &graph);
        // A second registration of a known port must not re-connect.
        bay.handle_port_appeared("A:p", &graph);
        assert_eq!(graph.connect_calls.borrow().len(), 1);
    }

    #[test]
    fn file_load_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("song.jackpatch");
        fs::write(
            &file,
            "seq66:midi_out |> fluidsynth:midi_in\nnot a patch line\nA:p || B:q\n",
        )
        .unwrap();

        let mut bay = PatchBay::new();
        bay.load_file(&file).unwrap();
        // The duplex line expands to two patches; the bad line is
        // dropped.
        assert_eq!(bay.patches().len(), 3);
    }
}
