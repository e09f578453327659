//! Typosquatting detector
//!
//! Classifies the host a request is "about" against the registry's known
//! hosts using the single-edit typo constraints.

use std::sync::Arc;

use parking_lot::RwLock;

use super::constraints::{default_typo_constraints, TypoConstraint};
use super::registry::{normalize_host, TrustRegistry};
use super::{TrafficCheck, Verdict};
use crate::error::GuardError;
use crate::http::{host_from_uri, HttpMessage};

/// Detects destinations that are one edit away from a known host
pub struct TyposquatDetector {
    registry: Arc<RwLock<TrustRegistry>>,
    constraints: Vec<Box<dyn TypoConstraint + Send + Sync>>,
}

impl TyposquatDetector {
    pub fn new(registry: Arc<RwLock<TrustRegistry>>) -> Self {
        Self {
            registry,
            constraints: default_typo_constraints(),
        }
    }

    /// Host the request originates from: `Origin`, else `Referer`, else the
    /// request's own destination
    ///
    /// The opaque origin `null` counts as absent.
    pub fn resolve_search_host(&self, msg: &HttpMessage) -> Result<String, GuardError> {
        if let Some(origin) = msg.header("origin").filter(|o| o.trim() != "null") {
            return Ok(host_from_uri(origin)?);
        }
        if let Some(referer) = msg.header("referer") {
            return Ok(host_from_uri(referer)?);
        }
        Ok(msg.host_name()?)
    }

    /// Classify the request
    ///
    /// The search host is scanned first. If it differs from the literal
    /// destination, the destination is scanned too; either one being safe
    /// makes the request safe, otherwise the search host's suspected target
    /// is reported.
    pub fn classify(&self, msg: &HttpMessage) -> Result<Verdict, GuardError> {
        let known = self.registry.read().known_hosts();

        let search_host = normalize_host(&self.resolve_search_host(msg)?);
        let result1 = match self.scan(&known, &search_host) {
            Scan::Exact => return Ok(Verdict::Safe),
            Scan::Done(verdict) => verdict,
        };

        let destination = normalize_host(&msg.host_name()?);
        if destination == search_host {
            return Ok(result1);
        }

        let result2 = match self.scan(&known, &destination) {
            Scan::Exact => return Ok(Verdict::Safe),
            Scan::Done(verdict) => verdict,
        };

        if result1.is_safe() || result2.is_safe() {
            return Ok(Verdict::Safe);
        }

        Ok(result1)
    }

    pub fn is_safe(&self, msg: &HttpMessage) -> Result<bool, GuardError> {
        Ok(self.classify(msg)?.is_safe())
    }

    /// Compare `host` with every known host; the last violation wins
    fn scan(&self, known: &[String], host: &str) -> Scan {
        let mut verdict = Verdict::Safe;

        for known_host in known {
            if known_host == host {
                return Scan::Exact;
            }

            if let Some(constraint) = self
                .constraints
                .iter()
                .find(|c| c.matches(known_host, host))
            {
                tracing::debug!(
                    constraint = constraint.name(),
                    host = %host,
                    known_host = %known_host,
                    "Typo constraint matched"
                );
                verdict = Verdict::Suspect {
                    legit_host: known_host.clone(),
                };
            }
        }

        Scan::Done(verdict)
    }
}

enum Scan {
    /// The host is itself a known host
    Exact,
    Done(Verdict),
}

impl TrafficCheck for TyposquatDetector {
    fn name(&self) -> &'static str {
        "Typosquatting"
    }

    fn check(&self, msg: &HttpMessage) -> Result<Verdict, GuardError> {
        self.classify(msg)
    }
}
