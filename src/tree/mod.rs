pub mod bipartite;
pub mod graft;
pub mod network;
pub mod node;
pub mod stats;

pub use bipartite::*;
pub use graft::*;
pub use network::*;
pub use node::*;
pub use stats::*;
