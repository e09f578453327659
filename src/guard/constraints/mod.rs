//! Constraint library
//!
//! Pure string predicates used by the detectors: four single-edit typo
//! rules and three password-strength rules.

mod password;
mod typo;

pub use password::{
    BasicDictionaryChecker, DictionaryStrength, NumericOnly, PasswordConstraint, PopularList,
};
pub use typo::{default_typo_constraints, TypoConstraint};
