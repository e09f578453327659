//! Single-edit typo constraints
//!
//! Each constraint answers "is `candidate` a typo of `original` under this
//! rule". Comparison is on raw chars, with no case folding or Unicode
//! normalization.

/// A rule recognising one kind of single-character edit
pub trait TypoConstraint {
    /// Rule name
    fn name(&self) -> &'static str;

    /// True if `candidate` is `original` with exactly one edit of this kind
    fn matches(&self, original: &str, candidate: &str) -> bool;
}

/// Exactly one pair of adjacent characters transposed
pub struct AdjacentSwap;

/// `candidate` has exactly one character inserted
pub struct ExtraCharacter;

/// `candidate` has exactly one character removed
pub struct MissingCharacter;

/// Exactly one character position differs
pub struct ReplacedCharacter;

impl TypoConstraint for AdjacentSwap {
    fn name(&self) -> &'static str {
        "adjacent-swap"
    }

    fn matches(&self, original: &str, candidate: &str) -> bool {
        let a: Vec<char> = original.chars().collect();
        let b: Vec<char> = candidate.chars().collect();
        if a.len() != b.len() {
            return false;
        }

        let mut swaps = 0;
        let mut i = 0;
        while i < a.len() {
            if a[i] != b[i] {
                // A mismatch on the last char cannot be a swap
                if i + 1 == a.len() || a[i] != b[i + 1] || a[i + 1] != b[i] {
                    return false;
                }
                swaps += 1;
                if swaps > 1 {
                    return false;
                }
                i += 2;
                continue;
            }
            i += 1;
        }

        swaps == 1
    }
}

impl TypoConstraint for ExtraCharacter {
    fn name(&self) -> &'static str {
        "extra-character"
    }

    fn matches(&self, original: &str, candidate: &str) -> bool {
        single_insertion(original, candidate)
    }
}

impl TypoConstraint for MissingCharacter {
    fn name(&self) -> &'static str {
        "missing-character"
    }

    fn matches(&self, original: &str, candidate: &str) -> bool {
        single_insertion(candidate, original)
    }
}

impl TypoConstraint for ReplacedCharacter {
    fn name(&self) -> &'static str {
        "replaced-character"
    }

    fn matches(&self, original: &str, candidate: &str) -> bool {
        let a: Vec<char> = original.chars().collect();
        let b: Vec<char> = candidate.chars().collect();
        if a.len() != b.len() {
            return false;
        }

        let mut diffs = 0;
        for (x, y) in a.iter().zip(b.iter()) {
            if x != y {
                diffs += 1;
                if diffs > 1 {
                    return false;
                }
            }
        }

        diffs == 1
    }
}

/// `longer` equals `shorter` with exactly one char inserted somewhere
///
/// Scans left to right allowing a single alignment skip.
fn single_insertion(shorter: &str, longer: &str) -> bool {
    let short: Vec<char> = shorter.chars().collect();
    let long: Vec<char> = longer.chars().collect();
    if short.len() + 1 != long.len() {
        return false;
    }

    let mut skip = 0;
    for (i, c) in long.iter().enumerate() {
        // Nothing skipped before the last char: the last char is the extra one
        if skip == 0 && i == long.len() - 1 {
            return true;
        }
        if *c != short[i - skip] {
            skip += 1;
            if skip > 1 {
                return false;
            }
        }
    }

    true
}

/// The four constraints in the order they are tried
pub fn default_typo_constraints() -> Vec<Box<dyn TypoConstraint + Send + Sync>> {
    vec![
        Box::new(AdjacentSwap),
        Box::new(ExtraCharacter),
        Box::new(MissingCharacter),
        Box::new(ReplacedCharacter),
    ]
}
