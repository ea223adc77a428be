//! Precondition and remediation vocabulary shared by the gate components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the independent capabilities that must hold before the stream opens.
///
/// Variants are declared in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionKind {
    RadioPower,
    Permissions,
    AuxiliaryService,
}

impl PreconditionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RadioPower => "radio_power",
            Self::Permissions => "permissions",
            Self::AuxiliaryService => "auxiliary_service",
        }
    }
}

impl fmt::Display for PreconditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known status of a precondition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionState {
    #[default]
    Unknown,
    Satisfied,
    Unsatisfied,
}

impl PreconditionState {
    #[must_use]
    pub fn from_check(holds: bool) -> Self {
        if holds {
            Self::Satisfied
        } else {
            Self::Unsatisfied
        }
    }

    #[must_use]
    pub fn is_satisfied(self) -> bool {
        self == Self::Satisfied
    }
}

/// Result of a user-mediated remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationOutcome {
    /// The user accepted and the action completed.
    Granted,
    /// The user refused.
    Declined,
    /// The user cancelled, or the remediation could not be completed.
    Unavailable,
}

impl RemediationOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Declined => "declined",
            Self::Unavailable => "unavailable",
        }
    }

    #[must_use]
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }
}

impl fmt::Display for RemediationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
