use crate::graph_error::DgraphError;

/// Trait for validating graph invariants that can be checked without communication.
pub trait DebugInvariants {
    /// Assert invariants in debug builds or when invariant checking is enabled.
    fn debug_assert_invariants(&self);
    /// Validate invariants and return the first error encountered.
    fn validate_invariants(&self) -> Result<(), DgraphError>;
}

/// Run a fallible check and panic on error when invariant checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}

impl DebugInvariants for crate::graph::Graph {
    fn debug_assert_invariants(&self) {
        debug_invariants!(self.validate_invariants(), "centralized graph");
    }

    fn validate_invariants(&self) -> Result<(), DgraphError> {
        self.check().map_err(DgraphError::from)
    }
}

impl<C: crate::algs::communicator::Communicator> DebugInvariants for crate::dgraph::DistGraph<C> {
    fn debug_assert_invariants(&self) {
        debug_invariants!(self.validate_invariants(), "distributed graph shard");
    }

    /// Local part of [`crate::dgraph::DistGraph::check`]; needs no peers.
    fn validate_invariants(&self) -> Result<(), DgraphError> {
        self.check_local().map_err(DgraphError::from)
    }
}
