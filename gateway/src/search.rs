//! Broadcast search
//!
//! Queries fan out on a well-known subject with an ephemeral inbox for
//! replies. Whatever arrives inside the collection window is concatenated
//! in arrival order; the gateway does no de-duplication or ranking, so
//! callers must treat results as a multiset.

use crate::context::GatewayContext;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use silta_core::{subjects, Device, Entity, Manifest, SearchQuery};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Total reply-collection window per broadcast
pub const SEARCH_WINDOW: Duration = Duration::from_millis(500);

/// Longest wait for any single reply inside the window
pub const SEARCH_MSG_WAIT: Duration = Duration::from_millis(100);

impl GatewayContext {
    /// Broadcast a plugin search; each reply carries one manifest
    pub async fn search_plugins(&self, pattern: &str) -> Vec<Manifest> {
        let query = SearchQuery {
            pattern: default_pattern(pattern),
            labels: None,
        };
        self.collect_replies(subjects::SEARCH_PLUGINS, &query)
            .await
            .iter()
            .filter_map(|payload| serde_json::from_slice(payload).ok())
            .collect()
    }

    /// Broadcast a device search; each reply carries a device array
    pub async fn search_devices(&self, pattern: &str, labels: &[String]) -> Vec<Device> {
        let query = SearchQuery {
            pattern: default_pattern(pattern),
            labels: parse_labels(labels),
        };
        self.collect_batches(subjects::SEARCH_DEVICES, &query).await
    }

    /// Broadcast an entity search; each reply carries an entity array
    pub async fn search_entities(&self, labels: &[String]) -> Vec<Entity> {
        let query = SearchQuery {
            pattern: "*".to_string(),
            labels: parse_labels(labels),
        };
        self.collect_batches(subjects::SEARCH_ENTITIES, &query).await
    }

    async fn collect_batches<T: DeserializeOwned>(
        &self,
        subject: &str,
        query: &SearchQuery,
    ) -> Vec<T> {
        self.collect_replies(subject, query)
            .await
            .iter()
            .filter_map(|payload| serde_json::from_slice::<Vec<T>>(payload).ok())
            .flatten()
            .collect()
    }

    /// Raw reply payloads collected inside the search window
    ///
    /// Stops when the window expires, when a single reply takes longer
    /// than the inner wait, or on any transport error.
    async fn collect_replies(&self, subject: &str, query: &SearchQuery) -> Vec<Bytes> {
        let Ok(data) = serde_json::to_vec(query) else {
            return Vec::new();
        };
        let inbox = self.bus().new_inbox();
        let Ok(mut sub) = self.bus().subscribe(&inbox).await else {
            return Vec::new();
        };
        if self
            .bus()
            .publish_request(subject, &inbox, Bytes::from(data))
            .await
            .is_err()
        {
            return Vec::new();
        }

        let mut replies = Vec::new();
        let start = tokio::time::Instant::now();
        while start.elapsed() < SEARCH_WINDOW {
            match sub.next_timeout(SEARCH_MSG_WAIT).await {
                Ok(Some(msg)) => replies.push(msg.payload),
                Ok(None) | Err(_) => break,
            }
        }
        debug!(subject = %subject, replies = replies.len(), "Broadcast search collected");
        replies
    }
}

fn default_pattern(pattern: &str) -> String {
    if pattern.is_empty() {
        "*".to_string()
    } else {
        pattern.to_string()
    }
}

/// Parse `key:value` label filters; malformed pairs are dropped
fn parse_labels(pairs: &[String]) -> Option<HashMap<String, String>> {
    if pairs.is_empty() {
        return None;
    }
    let labels: HashMap<String, String> = pairs
        .iter()
        .filter_map(|pair| {
            pair.split_once(':')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect();
    Some(labels)
}
