pub mod aggregator;
pub mod catalog;
pub mod comparator;
pub mod config;
pub mod engine;
pub mod error;
pub mod household;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod ranker;
pub mod runtime;
pub mod simulator;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod transform;

pub use engine::{EngineContext, EngineWorkers, PowerEngine};
pub use error::EngineError;
pub use pipeline::{Envelope, Pipeline};
