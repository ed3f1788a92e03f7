pub mod json;
pub mod report;
pub mod text;

pub use json::*;
pub use report::*;
pub use text::*;
