//! Identity types
//!
//! Participants are named by opaque strings chosen in the topology
//! description. The name doubles as the suffix of every broker queue the
//! participant owns, so it must stay stable for the whole run.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default identity of the coordinating scheduler
pub const SCHEDULER_NAME: &str = "scheduler";

/// Node identity - unique participant name
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Identity of the default scheduler
    pub fn scheduler() -> Self {
        NodeId(SCHEDULER_NAME.to_string())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId::new(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
