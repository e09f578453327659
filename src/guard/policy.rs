//! Password policy: an ordered chain of strength constraints

use super::constraints::{
    BasicDictionaryChecker, DictionaryStrength, NumericOnly, PasswordConstraint, PopularList,
};

/// Outcome of running a password through the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordVerdict {
    Strong,
    Weak { rule: &'static str, reason: String },
}

/// Password-strength chain; the first failing constraint decides
pub struct PasswordPolicy {
    constraints: Vec<Box<dyn PasswordConstraint + Send + Sync>>,
}

impl PasswordPolicy {
    pub fn new(constraints: Vec<Box<dyn PasswordConstraint + Send + Sync>>) -> Self {
        Self { constraints }
    }

    /// Numeric-only, popular-list, then dictionary strength
    pub fn standard(popular: PopularList) -> Self {
        Self::new(vec![
            Box::new(NumericOnly),
            Box::new(popular),
            Box::new(DictionaryStrength::new(Box::new(
                BasicDictionaryChecker::embedded(),
            ))),
        ])
    }

    pub fn evaluate(&self, password: &str) -> PasswordVerdict {
        for constraint in &self.constraints {
            if !constraint.passed(password) {
                return PasswordVerdict::Weak {
                    rule: constraint.name(),
                    reason: constraint.reason(password),
                };
            }
        }
        PasswordVerdict::Strong
    }

    /// Rule names in evaluation order
    pub fn rule_names(&self) -> Vec<&str> {
        self.constraints.iter().map(|c| c.name()).collect()
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::standard(PopularList::embedded())
    }
}
