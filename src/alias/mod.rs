pub mod collector;
pub mod hints;
pub mod pool;
pub mod probe;
pub mod rdns;
pub mod resolver;

pub use collector::*;
pub use hints::*;
pub use pool::SlotPool;
pub use probe::*;
pub use rdns::DnsProber;
pub use resolver::*;
