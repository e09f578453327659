//! Deferred login capture
//!
//! A suspicious login is parked under a random token until the operator
//! either confirms it (via a control command) or it ages out.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::app::MAX_PENDING_TTL_SECS;

/// Snapshot of a login submission awaiting a decision
#[derive(Debug, Clone)]
pub struct PendingLogin {
    /// Destination host of the submission
    pub host: String,
    pub username: String,
    pub password: String,
    pub captured_at: DateTime<Utc>,
}

/// Token-keyed store bounded by age and count
pub struct PendingLogins {
    entries: HashMap<String, PendingLogin>,
    ttl: Duration,
    capacity: usize,
}

impl PendingLogins {
    pub fn new(ttl_secs: u64, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: Duration::seconds(ttl_secs.min(MAX_PENDING_TTL_SECS) as i64),
            capacity: capacity.max(1),
        }
    }

    /// Store a snapshot and return its fresh token
    pub fn insert(&mut self, login: PendingLogin) -> String {
        self.purge_expired(Utc::now());

        while self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, login)| login.captured_at)
                .map(|(token, _)| token.clone());
            match oldest {
                Some(token) => {
                    tracing::debug!(token = %token, "Evicting oldest pending login");
                    self.entries.remove(&token);
                }
                None => break,
            }
        }

        let token = Uuid::new_v4().to_string();
        self.entries.insert(token.clone(), login);
        token
    }

    /// Consume a token
    pub fn take(&mut self, token: &str) -> Option<PendingLogin> {
        let login = self.entries.remove(token)?;
        if Utc::now() - login.captured_at > self.ttl {
            tracing::debug!(token = %token, "Pending login expired");
            return None;
        }
        Some(login)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.entries.retain(|_, login| now - login.captured_at <= ttl);
    }
}
