//! Message-passing plumbing shared by every distributed algorithm.

pub mod communicator;
pub mod wire;
