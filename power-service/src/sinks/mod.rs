pub mod engine;

pub use engine::EngineToggleSink;
