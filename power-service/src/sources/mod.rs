pub mod channel;
pub mod ndjson_toggles;

pub use channel::ChannelSource;
pub use ndjson_toggles::NdjsonToggleSource;
