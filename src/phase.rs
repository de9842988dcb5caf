//! Phase labels and ordered phase sequences.
//!
//! This module provides:
//! - `PhaseLabel`, the bound every checkpoint label satisfies
//! - `PhaseSequence`, a validated, totally ordered set of labels
//! - `Phase`, the built-in `FIRST`..`TENTH` labels used by scripted scenarios

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::PhaseError;

/// Anything usable as a checkpoint label.
pub trait PhaseLabel: Clone + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<T> PhaseLabel for T where T: Clone + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {}

/// A finite, totally ordered set of labels.
///
/// Ordinals are 1-based: the first label has ordinal 1 and the terminal state
/// of a gate over this sequence is `len() + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSequence<L> {
    labels: Vec<L>,
}

impl<L: PhaseLabel> PhaseSequence<L> {
    /// Ordinal of the first label in every sequence.
    pub const FIRST_ORDINAL: usize = 1;

    /// Build a sequence from labels in execution order.
    pub fn new(labels: impl IntoIterator<Item = L>) -> Result<Self, PhaseError> {
        let labels: Vec<L> = labels.into_iter().collect();
        if labels.is_empty() {
            return Err(PhaseError::EmptySequence);
        }
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(PhaseError::DuplicateLabel {
                    label: label.to_string(),
                });
            }
        }
        Ok(Self { labels })
    }

    /// Number of labels in the sequence.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false; empty sequences are rejected by `new`.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Ordinal reached once every phase has completed.
    pub fn terminal_ordinal(&self) -> usize {
        self.labels.len() + 1
    }

    /// 1-based ordinal of `label`, if it belongs to the sequence.
    pub fn ordinal_of(&self, label: &L) -> Option<usize> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|i| i + Self::FIRST_ORDINAL)
    }

    /// Label at a 1-based ordinal.
    pub fn label_at(&self, ordinal: usize) -> Option<&L> {
        ordinal
            .checked_sub(Self::FIRST_ORDINAL)
            .and_then(|i| self.labels.get(i))
    }

    /// Iterate labels in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &L> {
        self.labels.iter()
    }

    /// Human-readable name of an ordinal, `<finished>` for the terminal state.
    pub fn describe(&self, ordinal: usize) -> String {
        match self.label_at(ordinal) {
            Some(label) => label.to_string(),
            None => "<finished>".to_string(),
        }
    }
}

/// Built-in labels for scripted scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    First,
    Second,
    Third,
    Fourth,
    Fifth,
    Sixth,
    Seventh,
    Eighth,
    Ninth,
    Tenth,
}

impl Phase {
    /// Every built-in label in order.
    pub const ALL: [Phase; 10] = [
        Phase::First,
        Phase::Second,
        Phase::Third,
        Phase::Fourth,
        Phase::Fifth,
        Phase::Sixth,
        Phase::Seventh,
        Phase::Eighth,
        Phase::Ninth,
        Phase::Tenth,
    ];

    /// Sequence of the first `count` built-in labels.
    pub fn sequence(count: usize) -> Result<PhaseSequence<Phase>, PhaseError> {
        if count > Self::ALL.len() {
            return Err(PhaseError::UnknownPhase {
                label: format!("#{}", count),
            });
        }
        PhaseSequence::new(Self::ALL[..count].iter().copied())
    }

    /// 1-based position among the built-in labels.
    pub fn ordinal(self) -> usize {
        self as usize + 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::First => "FIRST",
            Phase::Second => "SECOND",
            Phase::Third => "THIRD",
            Phase::Fourth => "FOURTH",
            Phase::Fifth => "FIFTH",
            Phase::Sixth => "SIXTH",
            Phase::Seventh => "SEVENTH",
            Phase::Eighth => "EIGHTH",
            Phase::Ninth => "NINTH",
            Phase::Tenth => "TENTH",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = PhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| PhaseError::UnknownPhase {
                label: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_ordinals_are_one_based() {
        let seq = PhaseSequence::new(["setup", "write", "verify"]).unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.ordinal_of(&"setup"), Some(1));
        assert_eq!(seq.ordinal_of(&"verify"), Some(3));
        assert_eq!(seq.ordinal_of(&"missing"), None);
        assert_eq!(seq.terminal_ordinal(), 4);
    }

    #[test]
    fn test_label_at_and_describe() {
        let seq = Phase::sequence(3).unwrap();
        assert_eq!(seq.label_at(0), None);
        assert_eq!(seq.label_at(2), Some(&Phase::Second));
        assert_eq!(seq.describe(3), "THIRD");
        assert_eq!(seq.describe(4), "<finished>");
    }

    #[test]
    fn test_empty_sequence_rejected() {
        let result = PhaseSequence::<String>::new(Vec::new());
        assert!(matches!(result, Err(PhaseError::EmptySequence)));
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let result = PhaseSequence::new(["a", "b", "a"]);
        match result {
            Err(PhaseError::DuplicateLabel { label }) => assert_eq!(label, "a"),
            other => panic!("Expected DuplicateLabel, got {:?}", other),
        }
    }

    #[test]
    fn test_builtin_sequence() {
        let seq = Phase::sequence(7).unwrap();
        let labels: Vec<Phase> = seq.iter().copied().collect();
        assert_eq!(labels.first(), Some(&Phase::First));
        assert_eq!(labels.last(), Some(&Phase::Seventh));
        assert!(Phase::sequence(11).is_err());
        assert!(Phase::sequence(0).is_err());
    }

    #[test]
    fn test_phase_ordinal_matches_sequence() {
        let seq = Phase::sequence(10).unwrap();
        for phase in Phase::ALL {
            assert_eq!(seq.ordinal_of(&phase), Some(phase.ordinal()));
        }
    }

    #[test]
    fn test_phase_display_and_parse() {
        assert_eq!(Phase::Fourth.to_string(), "FOURTH");
        assert_eq!("fourth".parse::<Phase>().unwrap(), Phase::Fourth);
        assert!("eleventh".parse::<Phase>().is_err());
    }

    #[test]
    fn test_phase_serde_uses_upper_case() {
        let json = serde_json::to_string(&Phase::Sixth).unwrap();
        assert_eq!(json, "\"SIXTH\"");
        let back: Phase = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Phase::Sixth);
    }
}
