//! Error taxonomy of the branch-and-price core.

use thiserror::Error;

use crate::misc::{DecisionId, MasterVarId, OrigVarId};

/// Errors raised by the branching chain, the branching rules and the
/// solution bridge.
///
/// Most variants are recoverable at the orchestration layer: a branching
/// error makes the rule decline, a bridge error means "no solution".
/// `CorruptedTree` and `ChainNotNested` abort the solve.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BnpError {
    /// Separating set of a decision node was malformed
    #[error("invalid branching data: {0}")]
    InvalidBranchingData(String),

    /// No fractional candidate, or the candidate has no pricing variable
    #[error("branching not applicable: {0}")]
    BranchingNotApplicable(String),

    /// Small bound violation that was clamped while bridging solutions
    #[error("numeric anomaly on {var}: value {value} violates bound {bound} by {violation:e}")]
    NumericAnomaly {
        var: OrigVarId,
        value: f64,
        bound: f64,
        violation: f64,
    },

    /// Master solution could not be turned into an original solution
    #[error("no original solution could be derived: {0}")]
    InfeasibleBridge(String),

    /// Problem or decomposition input is inconsistent
    #[error("invalid decomposition: {0}")]
    InvalidDecomposition(String),

    /// Chain invariant broken, the search tree is unusable
    #[error("corrupted branching tree at {decision}: {reason}")]
    CorruptedTree { decision: DecisionId, reason: String },

    /// Decision id does not name a live node
    #[error("unknown decision node {0}")]
    UnknownDecision(DecisionId),

    /// Activation or deactivation out of stack order
    #[error("decision {0} activated or deactivated out of order")]
    ChainNotNested(DecisionId),

    /// Master variable id does not name a live column
    #[error("unknown master variable {0}")]
    UnknownMasterVar(MasterVarId),
}

impl BnpError {
    /// Whether a branching rule may swallow this error and decline
    pub fn is_decline(&self) -> bool {
        matches!(self, BnpError::InvalidBranchingData(_) | BnpError::BranchingNotApplicable(_))
    }

    /// Whether the solve has to stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, BnpError::CorruptedTree { .. } | BnpError::ChainNotNested(_) | BnpError::UnknownDecision(_))
    }
}

/// Result type of the core
pub type BnpResult<T> = Result<T, BnpError>;
