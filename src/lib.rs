#![cfg_attr(docsrs, feature(doc_cfg))]
//! # dgraph-nd
//!
//! Distributed graphs over message passing, with the pieces needed to compute
//! nested-dissection orderings of sparse matrices in parallel:
//!
//! - [`dgraph::DistGraph`]: one process-local shard plus ghost vertices,
//!   with halo exchange, induction, gather/scatter and folding onto half of
//!   the process group;
//! - [`coarsen`]: the synchronized point-to-point matching protocol and the
//!   coarse graph built from it;
//! - [`separate`]: direct and multilevel vertex separators;
//! - [`order`]: the nested-dissection driver and sequential fallbacks.
//!
//! Every collective routine takes its configuration explicitly through
//! [`config::Context`] and the strategy types of [`config`]. Communication
//! goes through the [`algs::communicator::Communicator`] trait; tests use the
//! in-process [`algs::communicator::ThreadComm`], real runs the MPI backend
//! (feature `mpi-support`).
//!
//! ## Determinism
//!
//! Random choices use `SmallRng` seeded from [`config::Context::seed`], the
//! process rank and the recursion level. With `deterministic` set, incoming
//! messages are also handled in a fixed order, so repeated runs on the same
//! number of processes give identical results.
//!
//! ```
//! use dgraph_nd::prelude::*;
//!
//! let orders = ThreadComm::run(2, |comm| {
//!     let g = DistGraph::build_grid_3d(comm, [6, 6, 2]).unwrap();
//!     let local = order_nd(&g, &NdParams::default(), &Context::default()).unwrap();
//!     local.gather(g.comm(), 0).unwrap()
//! });
//! let ordering = orders[0].as_ref().unwrap();
//! assert_eq!(ordering.perm.len(), 72);
//! ```

pub mod algs;
pub mod coarsen;
pub mod config;
pub mod debug_invariants;
pub mod dgraph;
pub mod graph;
pub mod graph_error;
pub mod order;
pub mod separate;

pub use debug_invariants::DebugInvariants;
pub use graph_error::DgraphError;

/// The most-used traits and types.
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, ThreadComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::coarsen::{Coarsening, coarsen};
    pub use crate::config::{Context, CoarsenParams, LevelParams, NdParams, OrderStrategy, SeparatorStrategy};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::dgraph::DistGraph;
    pub use crate::dgraph::fold::{FoldedGraph, fold_dup};
    pub use crate::graph::{Gnum, Graph};
    pub use crate::graph_error::DgraphError;
    pub use crate::order::{DistOrder, Ordering, SequentialOrderer, order_nd};
    pub use crate::separate::{VdGraph, separate};
}
