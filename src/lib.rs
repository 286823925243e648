// tubemux - deliver remote media as MP3 audio or streamable MP4 video

pub mod config;
pub mod media;

pub use config::{ConfigError, MuxStrategy, NetworkConfig, PipelineConfig};
pub use media::{Delivery, DeliveryError, MediaDelivery, Transcoder};
