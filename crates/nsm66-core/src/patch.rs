//! Patch snapshot text format.
//!
//! A snapshot line records one saved JACK connection between two
//! `client:port` endpoints:
//!
//! ```text
//! A:p |> B:q      connect A:p -> B:q
//! A:p |< B:q      connect B:q -> A:p
//! A:p || B:q      both directions
//! ```
//!
//! Client names may themselves contain colons (a2j bridge ports do), so
//! an endpoint is split at the *last* colon. Whitespace around port
//! names is trimmed.

use thiserror::Error;

/// One `client:port` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub client: String,
    pub port: String,
}

impl PortRef {
    #[must_use]
    pub fn new(client: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            port: port.into(),
        }
    }

    /// Split a full JACK port name at its last colon.
    #[must_use]
    pub fn parse(full: &str) -> Option<Self> {
        let (client, port) = full.rsplit_once(':')?;
        Some(Self::new(client.trim(), port.trim()))
    }
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.client, self.port)
    }
}

/// One saved unidirectional connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Patch {
    pub src: PortRef,
    pub dst: PortRef,
}

impl Patch {
    #[must_use]
    pub fn new(src: PortRef, dst: PortRef) -> Self {
        Self { src, dst }
    }

    /// The canonical snapshot form, always written with `|>`.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{} |> {}", self.src, self.dst)
    }
}

/// Patch-line parse failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchParseError {
    #[error("no direction token in {0:?}")]
    MissingDirection(String),

    #[error("endpoint without a colon in {0:?}")]
    MissingColon(String),
}

const TOKENS: [(&str, Direction); 3] = [
    ("|>", Direction::Forward),
    ("|<", Direction::Backward),
    ("||", Direction::Duplex),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
    Duplex,
}

/// Parse one snapshot line into one patch, or two for `||`.
pub fn parse_line(line: &str) -> Result<Vec<Patch>, PatchParseError> {
    let mut found: Option<(usize, &str, Direction)> = None;
    for (token, dir) in TOKENS {
        if let Some(pos) = line.find(token) {
            if found.map_or(true, |(best, _, _)| pos < best) {
                found = Some((pos, token, dir));
            }
        }
    }
    let Some((pos, token, dir)) = found else {
        return Err(PatchParseError::MissingDirection(line.to_string()));
    };

    let left = line[..pos].trim();
    let right = line[pos + token.len()..].trim();
    let left = PortRef::parse(left)
        .ok_or_else(|| PatchParseError::MissingColon(line.to_string()))?;
    let right = PortRef::parse(right)
        .ok_or_else(|| PatchParseError::MissingColon(line.to_string()))?;

    Ok(match dir {
        Direction::Forward => vec![Patch::new(left, right)],
        Direction::Backward => vec![Patch::new(right, left)],
        Direction::Duplex => vec![
            Patch::new(right.clone(), left.clone()),
            Patch::new(left, right),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_line() {
        let patches = parse_line("seq66:midi_out |> fluidsynth:midi_in").unwrap();
        assert_eq!(
            patches,
            vec![Patch::new(
                PortRef::new("seq66", "midi_out"),
                PortRef::new("fluidsynth", "midi_in"),
            )]
        );
    }

    #[test]
    fn backward_line_swaps_endpoints() {
        let patches = parse_line("A:p |< B:q").unwrap();
        assert_eq!(
            patches,
            vec![Patch::new(PortRef::new("B", "q"), PortRef::new("A", "p"))]
        );
    }

    #[test]
    fn duplex_line_emits_both() {
        let patches = parse_line("A:p || B:q").unwrap();
        assert_eq!(patches.len(), 2);
        assert_eq!(
            patches[0],
            Patch::new(PortRef::new("B", "q"), PortRef::new("A", "p"))
        );
        assert_eq!(
            patches[1],
            Patch::new(PortRef::new("A", "p"), PortRef::new("B", "q"))
        );
    }

    #[test]
    fn client_names_may_contain_colons() {
        let line = "a2j:Launchpad Mini (capture): Launchpad Mini MIDI 1 |> seq66:midi_in";
        let patches = parse_line(line).unwrap();
        assert_eq!(patches[0].src.client, "a2j:Launchpad Mini (capture)");
        assert_eq!(patches[0].src.port, "Launchpad Mini MIDI 1");
        assert_eq!(patches[0].dst, PortRef::new("seq66", "midi_in"));
    }

    #[test]
    fn whitespace_is_trimmed_from_ports() {
        let patches = parse_line("  A:p   |>   B: q ").unwrap();
        assert_eq!(patches[0].src, PortRef::new("A", "p"));
        assert_eq!(patches[0].dst, PortRef::new("B", "q"));
    }

    #[test]
    fn missing_direction_is_an_error() {
        assert_eq!(
            parse_line("A:p -> B:q"),
            Err(PatchParseError::MissingDirection("A:p -> B:q".to_string()))
        );
    }

    #[test]
    fn missing_colon_is_an_error() {
        assert!(matches!(
            parse_line("nocolon |> B:q"),
            Err(PatchParseError::MissingColon(_))
        ));
    }

    #[test]
    fn round_trip_is_stable() {
        let lines = [
            "PulseAudio JACK Sink:front-left |> system:playback_1",
            "seq66:midi_out |> fluidsynth:midi_in",
        ];
        for line in lines {
            let patches = parse_line(line).unwrap();
            assert_eq!(patches[0].to_line(), line);
        }
    }
}
