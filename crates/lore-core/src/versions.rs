//! Algorithm version registry.
//!
//! The current version for an operation is part of every cache key, so
//! bumping it here is the only way to retire all prior cache entries for
//! that operation. Keep `history` in step with prompt or logic changes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Operation whose output is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Classification,
    Relationship,
}

impl OperationType {
    pub const ALL: [OperationType; 2] = [Self::Classification, Self::Relationship];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Relationship => "relationship",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classification" => Ok(Self::Classification),
            "relationship" => Ok(Self::Relationship),
            other => Err(Error::InvalidInput(format!(
                "unsupported operation type '{}' (expected one of: classification, relationship)",
                other
            ))),
        }
    }
}

/// One entry in an operation's change history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionChange {
    pub version: &'static str,
    pub date: &'static str,
    pub summary: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlgorithmVersion {
    pub operation: OperationType,
    pub current: &'static str,
    pub history: &'static [VersionChange],
}

static CLASSIFICATION: AlgorithmVersion = AlgorithmVersion {
    operation: OperationType::Classification,
    current: "1.2.0",
    history: &[
        VersionChange {
            version: "1.0.0",
            date: "2026-03-02",
            summary: "Initial batched classification prompt",
        },
        VersionChange {
            version: "1.1.0",
            date: "2026-05-18",
            summary: "Player-character names steer Character over NPC",
        },
        VersionChange {
            version: "1.2.0",
            date: "2026-08-04",
            summary: "High-confidence labels from earlier batches carried forward",
        },
    ],
};

static RELATIONSHIP: AlgorithmVersion = AlgorithmVersion {
    operation: OperationType::Relationship,
    current: "1.1.0",
    history: &[
        VersionChange {
            version: "1.0.0",
            date: "2026-03-02",
            summary: "Initial relationship extraction grouped by note type",
        },
        VersionChange {
            version: "1.1.0",
            date: "2026-09-21",
            summary: "Endpoint content hashes stored on the entry for direction recovery",
        },
    ],
};

/// Registry lookup for `op`.
pub fn algorithm_version(op: OperationType) -> &'static AlgorithmVersion {
    match op {
        OperationType::Classification => &CLASSIFICATION,
        OperationType::Relationship => &RELATIONSHIP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_type_from_str() {
        assert_eq!(
            "classification".parse::<OperationType>().unwrap(),
            OperationType::Classification
        );
        assert_eq!(
            " Relationship ".parse::<OperationType>().unwrap(),
            OperationType::Relationship
        );
    }

    #[test]
    fn test_operation_type_rejects_unknown() {
        let err = "embedding".parse::<OperationType>().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(err.to_string().contains("embedding"));
    }

    #[test]
    fn test_current_version_is_last_history_entry() {
        for op in OperationType::ALL {
            let v = algorithm_version(op);
            assert_eq!(v.operation, op);
            let last = v.history.last().expect("history must not be empty");
            assert_eq!(last.version, v.current);
        }
    }

    #[test]
    fn test_versions_differ_per_operation_registry_entry() {
        let c = algorithm_version(OperationType::Classification);
        let r = algorithm_version(OperationType::Relationship);
        assert_ne!(c.operation, r.operation);
    }
}
