use std::{collections::HashMap, time::Duration};

use shared::domain::{PortletKey, PUBLIC_PARTITION};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    portlet: PortletKey,
    partition: String,
}

impl CacheKey {
    fn new(portlet: &PortletKey, partition: &str) -> Self {
        Self {
            portlet: portlet.clone(),
            partition: partition.to_string(),
        }
    }
}

/// TTL bookkeeping behind the derived `expired` flag of each portlet.
///
/// Entries are keyed by `(portletID@producer, partition)` where the partition
/// is the end-user id for user specific portlets and `"public"` otherwise.
#[derive(Debug, Clone)]
pub struct MarkupCache {
    default_ttl: Duration,
    expires_at: HashMap<CacheKey, Instant>,
}

impl MarkupCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            expires_at: HashMap::new(),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn partition_for(user_id: Option<&str>, user_specific: bool) -> String {
        match user_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(user_id) if user_specific => user_id.to_string(),
            _ => PUBLIC_PARTITION.to_string(),
        }
    }

    /// Marks the fragment fresh as of `now`.
    pub fn touch(&mut self, portlet: &PortletKey, partition: &str, now: Instant, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.expires_at
            .insert(CacheKey::new(portlet, partition), now + ttl);
    }

    /// Unknown fragments count as expired.
    pub fn is_expired(&self, portlet: &PortletKey, partition: &str, now: Instant) -> bool {
        self.expires_at
            .get(&CacheKey::new(portlet, partition))
            .map_or(true, |expires_at| now >= *expires_at)
    }

    pub fn expire(&mut self, portlet: &PortletKey, partition: &str) {
        self.expires_at.remove(&CacheKey::new(portlet, partition));
    }

    /// Drops every partition held for `portlet`.
    pub fn forget(&mut self, portlet: &PortletKey) {
        self.expires_at.retain(|key, _| &key.portlet != portlet);
    }

    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.expires_at.len();
        self.expires_at.retain(|_, expires_at| now < *expires_at);
        before - self.expires_at.len()
    }

    pub fn len(&self) -> usize {
        self.expires_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expires_at.is_empty()
    }
}
