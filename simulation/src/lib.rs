//! Simulated network of Rota nodes
//!
//! Each node is a [`ChainController`](rota_module_block_producer::ChainController)
//! behind its own lock. Nodes exchange blocks only through a
//! [`SimulatedNetwork`], which delivers them FIFO per ordered pair of linked
//! nodes and catches nodes up when they (re)connect.

pub mod chain;
pub mod network;

pub use chain::TestChain;
pub use network::{SharedController, SimulatedNetwork};
