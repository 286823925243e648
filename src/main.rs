// tubemux - command-line front end
//
// Resolves media, then writes MP3 audio or streamable MP4 video to a file
// or to stdout. Logs go to stderr so stdout can carry media bytes.

mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tubemux")]
#[command(about = "Stream remote media as MP3 audio or MP4 video", version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tubemux=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::handle_command(cli.command).await?;

    Ok(())
}
