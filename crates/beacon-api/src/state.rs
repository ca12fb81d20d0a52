//! Node state values
//!
//! States are opaque strings on the wire. The well-known ones get variants,
//! anything else a caller defines is kept verbatim in `Custom`.

use std::fmt;
use std::str::FromStr;

use beacon_common::{STATE_BYPASS, STATE_NOT_READY, STATE_ONLINE};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum NodeState {
    #[default]
    NotReady,
    Online,
    Bypass,
    Custom(String),
}

impl NodeState {
    pub fn as_str(&self) -> &str {
        match self {
            NodeState::NotReady => STATE_NOT_READY,
            NodeState::Online => STATE_ONLINE,
            NodeState::Bypass => STATE_BYPASS,
            NodeState::Custom(s) => s,
        }
    }

    /// Online or bypass; reachable through a direct node lookup.
    pub fn is_addressable(&self) -> bool {
        matches!(self, NodeState::Online | NodeState::Bypass)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Well-known states match case-insensitively and are normalised to their
/// upper-case wire spelling, so `"online"` is published as `ONLINE`. Custom
/// states keep the caller's spelling.
impl From<&str> for NodeState {
    fn from(value: &str) -> Self {
        if value.eq_ignore_ascii_case(STATE_ONLINE) {
            NodeState::Online
        } else if value.eq_ignore_ascii_case(STATE_BYPASS) {
            NodeState::Bypass
        } else if value.eq_ignore_ascii_case(STATE_NOT_READY) {
            NodeState::NotReady
        } else {
            NodeState::Custom(value.to_string())
        }
    }
}

impl From<String> for NodeState {
    fn from(value: String) -> Self {
        NodeState::from(value.as_str())
    }
}

impl FromStr for NodeState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(NodeState::from(s))
    }
}
