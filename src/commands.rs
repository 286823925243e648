// CLI commands - one handler per subcommand

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::info;

use tubemux::config::{ConfigError, MuxStrategy, PipelineConfig};
use tubemux::media::{
    Delivery, DeliveryError, MediaDelivery, ResolveError, SearchClient, ToolManager, ToolType,
    Transcoder, YtDlpResolver,
};

/// Failures surfaced by the binary
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("output error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show ffmpeg and yt-dlp availability
    Check,
    /// Print media details and the format catalog as JSON
    Info {
        /// Media id or URL
        id: String,
    },
    /// Search for videos (or playlists)
    Search {
        query: String,
        /// Search playlists instead of videos
        #[arg(long)]
        playlists: bool,
        /// Treat the query as a media id and list related media
        #[arg(long, conflicts_with = "playlists")]
        related: bool,
    },
    /// List the entries of a playlist
    Playlist {
        /// Playlist id or URL
        id: String,
    },
    /// Save the best audio as MP3
    Listen {
        /// Media id or URL
        id: String,
        /// Output file or directory; "-" writes to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Save the video with audio as MP4
    Watch {
        /// Media id or URL
        id: String,
        /// Output file or directory; "-" writes to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// How separate streams are handed to ffmpeg
        #[arg(long, value_parser = parse_strategy)]
        strategy: Option<MuxStrategy>,
    },
}

fn parse_strategy(value: &str) -> Result<MuxStrategy, String> {
    value.parse().map_err(|e: ConfigError| e.to_string())
}

/// Handle the CLI command
///
/// # Errors
/// Returns the typed failure of whichever step failed
pub async fn handle_command(command: Commands) -> Result<(), CliError> {
    let config = PipelineConfig::from_env()?;

    match command {
        Commands::Check => check(&config).await,
        Commands::Info { id } => show_info(&config, &id).await,
        Commands::Search {
            query,
            playlists,
            related,
        } => search(&config, &query, playlists, related).await,
        Commands::Playlist { id } => list_playlist(&config, &id).await,
        Commands::Listen { id, output } => {
            let delivery = build_delivery(&config).await?.listen(&id).await?;
            save(delivery, output).await
        }
        Commands::Watch {
            id,
            output,
            strategy,
        } => {
            let service = build_delivery(&config).await?;
            let strategy = strategy.unwrap_or(config.mux_strategy);
            let delivery = service.watch_with(&id, strategy).await?;
            save(delivery, output).await
        }
    }
}

async fn check(config: &PipelineConfig) -> Result<(), CliError> {
    let tools = ToolManager::from_config(config).get_all_tools().await;
    for tool in &tools {
        match (&tool.path, &tool.version) {
            (Some(path), Some(version)) => {
                println!("{:<8} {} ({})", tool.name, version, path.display())
            }
            (Some(path), None) => println!("{:<8} not runnable ({})", tool.name, path.display()),
            (None, _) => println!("{:<8} not found", tool.name),
        }
    }
    println!("mux strategy: {}", config.mux_strategy);
    Ok(())
}

async fn show_info(config: &PipelineConfig, id: &str) -> Result<(), CliError> {
    let resolver = build_resolver(config)?;
    let service = MediaDelivery::new(Arc::new(resolver), placeholder_transcoder(config), config);
    let info = service.info(id).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn search(
    config: &PipelineConfig,
    query: &str,
    playlists: bool,
    related: bool,
) -> Result<(), CliError> {
    let client = SearchClient::new(&config.network)?;
    let json = if playlists {
        serde_json::to_string_pretty(&client.search_playlists(query).await?)?
    } else if related {
        serde_json::to_string_pretty(&client.related(query).await?)?
    } else {
        serde_json::to_string_pretty(&client.search_videos(query).await?)?
    };
    println!("{}", json);
    Ok(())
}

async fn list_playlist(config: &PipelineConfig, id: &str) -> Result<(), CliError> {
    let entries = build_resolver(config)?.list_playlist(id).await?;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn build_resolver(config: &PipelineConfig) -> Result<YtDlpResolver, CliError> {
    let ytdlp = ToolManager::from_config(config)
        .locate(ToolType::YtDlp)
        .ok_or_else(|| DeliveryError::ProcessSpawnFailure("yt-dlp not found".to_string()))?;
    Ok(YtDlpResolver::new(ytdlp, config.network.clone())?)
}

/// Metadata-only commands never start a session
fn placeholder_transcoder(config: &PipelineConfig) -> Transcoder {
    let ffmpeg = config
        .ffmpeg_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("ffmpeg"));
    Transcoder::from_config(ffmpeg, config)
}

async fn build_delivery(config: &PipelineConfig) -> Result<MediaDelivery, CliError> {
    let ffmpeg = ToolManager::from_config(config).ensure_ready().await?;
    let resolver = build_resolver(config)?;
    let transcoder = Transcoder::from_config(ffmpeg, config);
    Ok(MediaDelivery::new(Arc::new(resolver), transcoder, config))
}

/// Where the body goes: stdout for "-", a named file, or a file in a directory
fn output_target(output: Option<PathBuf>, filename: &str) -> Option<PathBuf> {
    match output {
        Some(path) if path.as_os_str() == "-" => None,
        Some(path) if path.is_dir() => Some(path.join(filename)),
        Some(path) => Some(path),
        None => {
            let dir = dirs::download_dir().unwrap_or_else(|| PathBuf::from("."));
            Some(dir.join(filename))
        }
    }
}

async fn save(delivery: Delivery, output: Option<PathBuf>) -> Result<(), CliError> {
    let target = output_target(output, &delivery.filename);
    let mut body = delivery.body;

    let bytes = match &target {
        Some(path) => {
            let mut file = tokio::fs::File::create(path).await?;
            copy_body(&mut body, &mut file).await?
        }
        None => copy_body(&mut body, &mut tokio::io::stdout()).await?,
    };

    match target {
        Some(path) => info!(path = %path.display(), bytes, "saved"),
        None => info!(bytes, "written to stdout"),
    }
    Ok(())
}

async fn copy_body<W>(body: &mut tubemux::media::ByteStream, sink: &mut W) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let bytes = tokio::io::copy(body, sink).await?;
    sink.flush().await?;
    Ok(bytes)
}
