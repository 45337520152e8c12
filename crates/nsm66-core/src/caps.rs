//! Client capability strings.
//!
//! Capabilities travel as a colon-delimited list enclosed in colons,
//! e.g. `:switch:optional-gui:`. A client with an empty capability
//! string is a *dumb* client: it never announced and receives no
//! client-protocol messages.

/// The `:switch:` capability: the client can be re-pointed at a new
/// project path without a restart.
pub const CAP_SWITCH: &str = ":switch:";

/// The `:optional-gui:` capability.
pub const CAP_OPTIONAL_GUI: &str = ":optional-gui:";

/// Capabilities advertised by the server itself in announce replies.
pub const SERVER_CAPS: &str = ":server-control:broadcast:optional-gui:";

/// A colon-delimited capability set as reported at announce time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(String);

impl Capabilities {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// `capability` must be enclosed in colons, as in `":switch:"`.
    #[must_use]
    pub fn is_capable_of(&self, capability: &str) -> bool {
        self.0.contains(capability)
    }

    /// A dumb client reported no capabilities at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_lookup() {
        let caps = Capabilities::new(":switch:optional-gui:");
        assert!(caps.is_capable_of(CAP_SWITCH));
        assert!(caps.is_capable_of(CAP_OPTIONAL_GUI));
        assert!(!caps.is_capable_of(":broadcast:"));
        assert!(!caps.is_empty());
    }

    #[test]
    fn empty_set_is_dumb() {
        let caps = Capabilities::default();
        assert!(caps.is_empty());
        assert!(!caps.is_capable_of(CAP_SWITCH));
    }
}
