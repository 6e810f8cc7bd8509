//! DgraphError: unified error type for the public APIs of dgraph-nd.
//!
//! Every fallible routine returns `Result<_, DgraphError>`. Communication
//! failures carry the name of the operation and a numbered site so that a
//! failing collective step can be located from a single log line.

use thiserror::Error;

use crate::algs::communicator::CommError;
use crate::algs::wire::WireError;
use crate::graph::Gnum;

/// Unified error type for graph, coarsening, separation and ordering routines.
#[derive(Debug, Error)]
pub enum DgraphError {
    /// A buffer could not be allocated.
    #[error("out of memory while allocating {what} ({len} items)")]
    OutOfMemory { what: &'static str, len: usize },
    /// A message-passing primitive failed; fatal to the enclosing collective step.
    #[error("{op}: communication error ({site})")]
    Communication {
        op: &'static str,
        site: u32,
        #[source]
        source: CommError,
    },
    /// A received message could not be decoded.
    #[error("{op}: malformed message: {source}")]
    Wire {
        op: &'static str,
        #[source]
        source: WireError,
    },
    /// The graph violates one of its structural invariants.
    #[error("inconsistent graph: {0}")]
    InconsistentGraph(#[from] GraphCheckError),
    /// Another process of the group reported a failure.
    #[error("{op}: aborted because a peer process failed")]
    RemoteFailure { op: &'static str },
    /// An assertion that only debug builds check did not hold.
    #[error("{op}: internal error ({site})")]
    Internal { op: &'static str, site: u32 },
    /// Caller supplied parameters that cannot be honoured.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Fine-grained diagnosis returned by the graph consistency checkers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphCheckError {
    #[error("invalid vertex numbers")]
    InvalidVertexCount,
    #[error("invalid edge numbers")]
    InvalidEdgeCount,
    #[error("vertex {vertex}: invalid vertex arrays")]
    NonMonotonicCsr { vertex: Gnum },
    #[error("vertex {vertex}: edge end {end} out of range")]
    InvalidEdgeEnd { vertex: Gnum, end: Gnum },
    #[error("vertex {vertex}: loops not allowed")]
    SelfLoop { vertex: Gnum },
    #[error("arc ({src}, {dst}): arc data do not match")]
    AsymmetricArc { src: Gnum, dst: Gnum },
    #[error("arc ({src}, {dst}): duplicate arc")]
    DuplicateArc { src: Gnum, dst: Gnum },
    #[error("vertex {vertex}: invalid vertex load")]
    NegativeVertexLoad { vertex: Gnum },
    #[error("vertex {vertex}: invalid edge load")]
    NegativeEdgeLoad { vertex: Gnum },
    #[error("vertex load sum overflow")]
    VertexLoadOverflow,
    #[error("edge load sum overflow")]
    EdgeLoadOverflow,
    #[error("invalid number of edges: declared {declared}, found {found}")]
    EdgeCountMismatch { declared: Gnum, found: Gnum },
    #[error("invalid vertex load sum: declared {declared}, found {found}")]
    VertexLoadSumMismatch { declared: Gnum, found: Gnum },
    #[error("invalid edge load sum: declared {declared}, found {found}")]
    EdgeLoadSumMismatch { declared: Gnum, found: Gnum },
    #[error("invalid maximum degree: declared {declared}, found {found}")]
    MaxDegreeMismatch { declared: Gnum, found: Gnum },
    #[error("array {array} has length {found}, expected {expected}")]
    ArrayLength {
        array: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("inconsistent process vertex table")]
    ProcessTable,
    #[error("graph is inconsistent on another process")]
    Remote,
}

impl DgraphError {
    /// Shorthand for building a communication error at a numbered site.
    pub fn comm(op: &'static str, site: u32, source: CommError) -> Self {
        DgraphError::Communication { op, site, source }
    }

    /// Shorthand for building a debug-build internal error.
    pub fn internal(op: &'static str, site: u32) -> Self {
        DgraphError::Internal { op, site }
    }
}

/// Attach an operation name and site number to a raw backend result.
pub trait CommResultExt<T> {
    fn at(self, op: &'static str, site: u32) -> Result<T, DgraphError>;
}

impl<T> CommResultExt<T> for Result<T, CommError> {
    #[inline]
    fn at(self, op: &'static str, site: u32) -> Result<T, DgraphError> {
        self.map_err(|e| DgraphError::comm(op, site, e))
    }
}

/// Attach an operation name to a wire decoding result.
pub trait WireResultExt<T> {
    fn decoded(self, op: &'static str) -> Result<T, DgraphError>;
}

impl<T> WireResultExt<T> for Result<T, WireError> {
    #[inline]
    fn decoded(self, op: &'static str) -> Result<T, DgraphError> {
        self.map_err(|source| DgraphError::Wire { op, source })
    }
}

/// Allocate a vector of `len` copies of `value`, reporting allocation failure
/// as [`DgraphError::OutOfMemory`] instead of aborting.
pub fn try_vec<T: Clone>(what: &'static str, len: usize, value: T) -> Result<Vec<T>, DgraphError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| DgraphError::OutOfMemory { what, len })?;
    v.resize(len, value);
    Ok(v)
}

/// Reserve room for `len` items in an empty vector, reporting failure as
/// [`DgraphError::OutOfMemory`].
pub fn try_with_capacity<T>(what: &'static str, len: usize) -> Result<Vec<T>, DgraphError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| DgraphError::OutOfMemory { what, len })?;
    Ok(v)
}
