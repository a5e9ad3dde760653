pub mod batcher;
pub mod compression;
pub mod queue;
pub mod store;

pub use batcher::*;
pub use compression::*;
pub use queue::*;
pub use store::*;
