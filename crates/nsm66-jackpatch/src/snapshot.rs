//! Snapshots of the live connection graph.
//!
//! A snapshot records every current connection of every output port,
//! one `A:p |> B:q` line each, sorted lexicographically. Saved patches
//! whose endpoints are not currently live are carried over unchanged:
//! a port that is temporarily gone must not cost the user a saved
//! connection.

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::{info, warn};

use nsm66_core::patch::parse_line;

use crate::graph::PortGraph;
use crate::patchbay::PatchBay;

/// Build the snapshot lines and reload the bay's patch list from
/// them, so the in-memory state matches what lands on disk.
///
/// Returns `None` when the graph reports no output ports at all; in
/// that case nothing is touched.
pub fn take(bay: &mut PatchBay, graph: &dyn PortGraph) -> Option<Vec<String>> {
    let outputs = graph.output_ports();
    if outputs.is_empty() {
        warn!("no JACK output ports, keeping the previous snapshot");
        return None;
    }

    // Connections with a missing endpoint are considered temporarily
    // gone by accident and preserved verbatim.
    let mut lines: Vec<String> = Vec::new();
    for entry in bay.patches() {
        let src = entry.patch.src.to_string();
        let dst = entry.patch.dst.to_string();
        if !graph.port_exists(&src) {
            info!(port = %src, "source port is gone, preserving its connection");
            lines.push(entry.patch.to_line());
        } else if !graph.port_exists(&dst) {
            info!(port = %dst, "destination port is gone, preserving its connection");
            lines.push(entry.patch.to_line());
        }
    }

    bay.clear_patches();
    for line in &lines {
        match parse_line(line) {
            Ok(patches) => {
                for patch in patches {
                    bay.add_patch(patch);
                }
            }
            Err(err) => warn!(%line, %err, "could not re-ingest a preserved patch"),
        }
    }

    for output in &outputs {
        for connection in graph.connections_of(output) {
            let line = format!("{output} |> {connection}");
            match parse_line(&line) {
                Ok(patches) => {
                    for patch in patches {
                        bay.add_patch(patch);
                    }
                    lines.push(line);
                }
                Err(err) => warn!(%line, %err, "could not record a connection"),
            }
        }
    }

    lines.sort();
    Some(lines)
}

/// Write snapshot lines to the patch file, creating parent
/// directories as needed.
pub fn write_file(file: &Path, lines: &[String]) -> std::io::Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = fs::File::create(file)?;
    for line in lines {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use nsm66_core::patch::parse_line;

    use super::*;
    use crate::graph::ConnectError;

    struct MockGraph {
        ports: HashSet<String>,
        connections: HashMap<String, Vec<String>>,
    }

    impl MockGraph {
        fn new(ports: &[&str], connections: &[(&str, &str)]) -> Self {
            let mut map: HashMap<String, Vec<String>> = HashMap::new();
            for (src, dst) in connections {
                map.entry(src.to_string()).or_default().push(dst.to_string());
            }
            Self {
                ports: ports.iter().map(|p| p.to_string()).collect(),
                connections: map,
            }
        }
    }

    impl PortGraph for MockGraph {
        fn connect(&self, _src: &str, _dst: &str) -> Result<(), ConnectError> {
            Ok(())
        }

        fn all_ports(&self) -> Vec<String> {
            self.ports.iter().cloned().collect()
        }

        fn output_ports(&self) -> Vec<String> {
            let mut outputs: Vec<String> = self
                .ports
                .iter()
                .filter(|p| p.contains("out"))
                .cloned()
                .collect();
            outputs.sort();
            outputs
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

    #[test]
    fn live_connections_become_sorted_lines() {
        let graph = MockGraph::new(
            &["b:out", "a:out", "x:in", "y:in"],
            &[("b:out", "x:in"), ("a:out", "y:in")],
        );
        let mut bay = PatchBay::new();

        let lines = take(&mut bay, &graph).unwrap();
        assert_eq!(lines, vec!["a:out |> y:in", "b:out |> x:in"]);
        assert_eq!(bay.patches().len(), 2);
    }

    #[test]
    fn missing_endpoints_are_preserved() {
        // The saved patch references a port not present in the graph;
        // the snapshot must carry it over instead of forgetting it.
        let graph = MockGraph::new(&["a:out", "x:in"], &[("a:out", "x:in")]);
        let mut bay = PatchBay::new();
        for patch in parse_line("gone:out |> x:in").unwrap() {
            bay.add_patch(patch);
        }

        let lines = take(&mut bay, &graph).unwrap();
        assert_eq!(lines, vec!["a:out |> x:in", "gone:out |> x:in"]);
        assert_eq!(bay.patches().len(), 2);
    }

    #[test]
    fn empty_graph_keeps_everything() {
        let graph = MockGraph::new(&[], &[]);
        let mut bay = PatchBay::new();
        for patch in parse_line("a:out |> x:in").unwrap() {
            bay.add_patch(patch);
        }
        assert!(take(&mut bay, &graph).is_none());
        assert_eq!(bay.patches().len(), 1);
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let graph = MockGraph::new(&["a:out", "x:in"], &[("a:out", "x:in")]);
        let mut bay = PatchBay::new();
        let lines = take(&mut bay, &graph).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("proj.jackpatch");
        write_file(&file, &lines).unwrap();

        let mut reloaded = PatchBay::new();
        reloaded.load_file(&file).unwrap();
        let relines = take(&mut reloaded, &graph).unwrap();
        assert_eq!(lines, relines);
    }
}
