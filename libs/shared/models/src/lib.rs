pub mod network;

pub use network::{ConnectionType, NetworkConditions, QualityTier};
