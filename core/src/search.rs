//! Broadcast search queries

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A query broadcast on a search subject
///
/// Every plugin that matches replies to the ephemeral inbox named in the
/// request; the gateway concatenates replies in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Glob-style name pattern (`*` matches everything)
    pub pattern: String,
    /// Label filters, ANDed together
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}
