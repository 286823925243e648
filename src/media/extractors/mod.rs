// Resolver implementations
//
// `YtDlpResolver` runs the yt-dlp binary for metadata and fetches the
// selected representations over HTTP. Its stderr is classified by
// `diagnostics` into not-found vs. upstream failures.

mod cli;
mod diagnostics;

pub use cli::{parse_details, parse_playlist, YtDlpResolver};
pub use diagnostics::{diagnose_error, FailureReason};
