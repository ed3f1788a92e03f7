pub mod router;
pub mod set;
pub mod subnet;
pub mod table;

pub use router::*;
pub use set::*;
pub use subnet::*;
pub use table::*;
