//! Typosquatting and phishing guard
//!
//! Everything that decides what happens to a proxied request: the trust
//! registry, the two detectors, the password policy, operator control
//! commands and the decision engine tying them together.

mod constraints;
mod control;
mod engine;
mod pending;
mod phishing;
mod policy;
mod registry;
mod store;
mod templates;
mod typosquat;

pub use engine::{DecisionEngine, RequestOutcome, ResponseOutcome, TunnelDecision};
pub use registry::TrustRegistry;
pub use store::{JsonFileStore, RegistryStore};

use crate::error::GuardError;
use crate::http::HttpMessage;

/// Result of a detector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Safe,
    /// The request looks like it targets a lookalike of `legit_host`
    Suspect { legit_host: String },
}

impl Verdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, Verdict::Safe)
    }

    pub fn suspected_host(&self) -> Option<&str> {
        match self {
            Verdict::Safe => None,
            Verdict::Suspect { legit_host } => Some(legit_host),
        }
    }
}

/// A detector run against every request
pub trait TrafficCheck {
    fn name(&self) -> &'static str;

    fn check(&self, msg: &HttpMessage) -> Result<Verdict, GuardError>;
}
