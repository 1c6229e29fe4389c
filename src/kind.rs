//! Optimization kind.
//!
//! The kind fixes what the external optimizer compares the composed block
//! operators against. It is chosen when a gate set is initialized and is
//! the one option that `reconfigure` can never change:
//!
//! ```text
//!   initialize(kind) ──→ Initialized ──reconfigure(same kind)──→ Initialized'
//!                             │
//!                             └──reconfigure(other kind)──→ InvalidReconfiguration
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GateSetError;

/// What an optimization run is trying to realize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationKind {
    /// Synthesize a full target unitary.
    #[default]
    Unitary,
    /// Map one or more initial states onto target states.
    StateTransfer,
    /// Evaluate fixed parameters without optimizing.
    Analysis,
}

impl OptimizationKind {
    /// Canonical lowercase name, as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationKind::Unitary => "unitary",
            OptimizationKind::StateTransfer => "state_transfer",
            OptimizationKind::Analysis => "analysis",
        }
    }
}

impl std::fmt::Display for OptimizationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationKind {
    type Err = GateSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unitary" => Ok(OptimizationKind::Unitary),
            "state_transfer" | "state transfer" => Ok(OptimizationKind::StateTransfer),
            "analysis" => Ok(OptimizationKind::Analysis),
            other => Err(GateSetError::InvalidConfiguration(format!(
                "unknown optimization type: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(OptimizationKind::Unitary.to_string(), "unitary");
        assert_eq!(OptimizationKind::StateTransfer.to_string(), "state_transfer");
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!(
            "state transfer".parse::<OptimizationKind>().unwrap(),
            OptimizationKind::StateTransfer
        );
        assert_eq!(
            "Analysis".parse::<OptimizationKind>().unwrap(),
            OptimizationKind::Analysis
        );
        assert!("gradient".parse::<OptimizationKind>().is_err());
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&OptimizationKind::StateTransfer).unwrap();
        assert_eq!(json, "\"state_transfer\"");
        let kind: OptimizationKind = serde_json::from_str("\"unitary\"").unwrap();
        assert_eq!(kind, OptimizationKind::Unitary);
    }
}
