//! Configuration values passed explicitly through every distributed routine.
//!
//! All types are serde-serialisable and default-constructible; missing
//! fields take their default when decoding.

use serde::{Deserialize, Serialize};

use crate::graph::Gnum;

/// Run-wide settings shared by every step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    /// Handle incoming messages in a fixed order and never shuffle queues.
    pub deterministic: bool,
    /// Base seed of the per-process random generators.
    pub seed: u64,
    /// Fold both halves of a process group concurrently on two threads.
    pub fold_threads: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            deterministic: true,
            seed: 42,
            fold_threads: false,
        }
    }
}

impl Context {
    /// Seed of the generator used by process `rank` at recursion `level`.
    pub fn seed_for(&self, rank: usize, level: u64) -> u64 {
        self.seed ^ (rank as u64).rotate_left(17) ^ level.wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }
}

/// Parameters of one distributed coarsening step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoarsenParams {
    /// Do not coarsen graphs with fewer global vertices than this.
    pub min_vertices: Gnum,
    /// Coarsening is rejected when coarse/fine vertex ratio exceeds this.
    pub max_ratio: f64,
    /// Upper bound on request/reply passes of the matching protocol.
    pub passes: usize,
    /// Probability that a vertex whose best mate is remote sends a request
    /// in a given pass instead of staying available for incoming ones.
    pub request_probability: f64,
}

impl Default for CoarsenParams {
    fn default() -> Self {
        Self {
            min_vertices: 16,
            max_ratio: 0.8,
            passes: 5,
            request_probability: 0.5,
        }
    }
}

/// Parameters of the level-structure separator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelParams {
    /// Number of pseudo-peripheral root refinements.
    pub root_passes: usize,
    /// Run the thinning pass after separation.
    pub thin: bool,
}

impl Default for LevelParams {
    fn default() -> Self {
        Self {
            root_passes: 4,
            thin: true,
        }
    }
}

/// How to compute a vertex separator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeparatorStrategy {
    /// Gather the graph everywhere and separate it with the level structure.
    Direct(LevelParams),
    /// Coarsen, separate the coarsest graph directly, project back and thin.
    Multilevel {
        #[serde(default)]
        coarsen: CoarsenParams,
        /// Stop coarsening below this many global vertices.
        #[serde(default = "default_coarse_target")]
        coarse_target: Gnum,
        #[serde(default)]
        level: LevelParams,
        /// Thinning sweeps after each projection.
        #[serde(default = "default_thin_passes")]
        thin_passes: usize,
    },
}

fn default_coarse_target() -> Gnum {
    120
}

fn default_thin_passes() -> usize {
    2
}

impl Default for SeparatorStrategy {
    fn default() -> Self {
        SeparatorStrategy::Multilevel {
            coarsen: CoarsenParams::default(),
            coarse_target: default_coarse_target(),
            level: LevelParams::default(),
            thin_passes: default_thin_passes(),
        }
    }
}

/// Sequential ordering applied to leaves and separators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStrategy {
    #[default]
    Rcm,
    Natural,
}

/// Parameters of the nested-dissection driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NdParams {
    pub separator: SeparatorStrategy,
    /// Ordering of leaves (subgraphs that are not separated further).
    pub leaf: OrderStrategy,
    /// Ordering of separators.
    pub separator_order: OrderStrategy,
    /// Graphs with at most this many global vertices become leaves.
    pub leaf_size: Gnum,
}

impl Default for NdParams {
    fn default() -> Self {
        Self {
            separator: SeparatorStrategy::default(),
            leaf: OrderStrategy::Rcm,
            separator_order: OrderStrategy::Natural,
            leaf_size: 10,
        }
    }
}
