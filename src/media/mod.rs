// Media module - selection, resolution and on-the-fly transcoding

pub mod errors;
pub mod extractors;
pub mod format_selector;
pub mod models;
pub mod orchestrator;
pub mod search;
pub mod tools;
pub mod traits;
pub mod transcoder;
pub mod utils;

pub use errors::{DeliveryError, ErrorPayload, ResolveError, SelectionError, TranscodeError};
pub use extractors::YtDlpResolver;
pub use format_selector::FormatSelector;
pub use models::{
    MediaDetails, PlaylistResult, Representation, SearchResult, Selection, VideoInfo,
};
pub use orchestrator::{content_disposition, Delivery, MediaDelivery};
pub use search::SearchClient;
pub use tools::{ToolInfo, ToolManager, ToolType};
pub use traits::{ByteStream, MediaResolver, OpenedStream};
pub use transcoder::{SessionReport, Transcoder};
