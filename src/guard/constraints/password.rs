//! Password-strength constraints

use std::collections::HashSet;
use std::path::Path;

use crate::error::GuardError;

/// Embedded blacklist of common passwords, one per line
const EMBEDDED_POPULAR_PASSWORDS: &str = include_str!("../../../data/popular-passwords.txt");

/// Shortest password the dictionary check accepts
const MIN_LENGTH: usize = 6;

/// Fewest distinct characters the dictionary check accepts
const MIN_DISTINCT_CHARS: usize = 5;

/// A single password-strength rule
pub trait PasswordConstraint {
    /// Rule name
    fn name(&self) -> &'static str;

    /// True if the password satisfies this rule
    fn passed(&self, password: &str) -> bool;

    /// Human-readable reason shown when the rule rejects a password
    fn reason(&self, password: &str) -> String;
}

/// Rejects passwords made only of decimal digits
pub struct NumericOnly;

impl PasswordConstraint for NumericOnly {
    fn name(&self) -> &'static str {
        "numeric-only"
    }

    fn passed(&self, password: &str) -> bool {
        !password.chars().all(|c| c.is_ascii_digit())
    }

    fn reason(&self, _password: &str) -> String {
        "Password only contains numbers".to_string()
    }
}

/// Rejects passwords found verbatim in a list of popular passwords
pub struct PopularList {
    passwords: HashSet<String>,
}

impl PopularList {
    /// Build from newline-separated text
    pub fn from_text(text: &str) -> Self {
        let passwords = text
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self { passwords }
    }

    /// The list shipped with the binary
    pub fn embedded() -> Self {
        Self::from_text(EMBEDDED_POPULAR_PASSWORDS)
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, GuardError> {
        let text = std::fs::read_to_string(path)?;
        let list = Self::from_text(&text);
        tracing::info!(count = list.len(), path = %path.display(), "Loaded popular passwords");
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.passwords.len()
    }

    pub fn contains(&self, password: &str) -> bool {
        self.passwords.contains(password)
    }
}

impl PasswordConstraint for PopularList {
    fn name(&self) -> &'static str {
        "popular-list"
    }

    fn passed(&self, password: &str) -> bool {
        !self.contains(password)
    }

    fn reason(&self, _password: &str) -> String {
        format!("Password is among the {} most popular passwords", self.len())
    }
}

/// External dictionary-based strength checker
pub trait StrengthChecker {
    /// `Err(reason)` if the password is rejected
    fn check(&self, password: &str) -> Result<(), String>;
}

/// Cracklib-style heuristics over a word list
pub struct BasicDictionaryChecker {
    words: HashSet<String>,
}

impl BasicDictionaryChecker {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|w| w.as_ref().to_lowercase())
            .filter(|w| w.len() >= 4 && w.chars().any(|c| c.is_alphabetic()))
            .collect();
        Self { words }
    }

    /// Checker using the embedded popular-password list as its dictionary
    pub fn embedded() -> Self {
        Self::new(EMBEDDED_POPULAR_PASSWORDS.lines())
    }

    fn is_dictionary_word(&self, password: &str) -> bool {
        let lower = password.to_lowercase();
        let stripped = lower.trim_matches(|c: char| !c.is_alphabetic());
        let reversed: String = stripped.chars().rev().collect();

        self.words.contains(&lower)
            || (!stripped.is_empty() && self.words.contains(stripped))
            || (!reversed.is_empty() && self.words.contains(&reversed))
    }
}

impl StrengthChecker for BasicDictionaryChecker {
    fn check(&self, password: &str) -> Result<(), String> {
        if password.trim().is_empty() {
            return Err("it is all whitespace".into());
        }

        if password.chars().count() < MIN_LENGTH {
            return Err("it is too short".into());
        }

        let distinct: HashSet<char> = password.chars().collect();
        if distinct.len() < MIN_DISTINCT_CHARS {
            return Err("it does not contain enough different characters".into());
        }

        if is_sequential(password) {
            return Err("it is too simplistic/systematic".into());
        }

        if self.is_dictionary_word(password) {
            return Err("it is based on a dictionary word".into());
        }

        Ok(())
    }
}

/// Every char is one code point above (or below) the previous one
fn is_sequential(password: &str) -> bool {
    let codes: Vec<u32> = password.chars().map(|c| c as u32).collect();
    if codes.len() < 2 {
        return false;
    }
    let ascending = codes.windows(2).all(|w| w[1] == w[0] + 1);
    let descending = codes.windows(2).all(|w| w[0] == w[1] + 1);
    ascending || descending
}

/// Rejects passwords the dictionary checker refuses
pub struct DictionaryStrength {
    checker: Box<dyn StrengthChecker + Send + Sync>,
}

impl DictionaryStrength {
    pub fn new(checker: Box<dyn StrengthChecker + Send + Sync>) -> Self {
        Self { checker }
    }
}

impl PasswordConstraint for DictionaryStrength {
    fn name(&self) -> &'static str {
        "dictionary-strength"
    }

    fn passed(&self, password: &str) -> bool {
        self.checker.check(password).is_ok()
    }

    fn reason(&self, password: &str) -> String {
        match self.checker.check(password) {
            Err(why) => format!("Password fails the dictionary check: {}", why),
            Ok(()) => "Password fails the dictionary check".to_string(),
        }
    }
}
