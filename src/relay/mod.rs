pub mod engine;

pub use engine::{RelayEngine, RelayOptions, RelayStats, TransformDirection};
