use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use videoproc::config::{InputKind, PipelineConfig};

/// Transform a video by running a script on every frame and another on
/// every pair of adjacent frames.
#[derive(Parser, Debug)]
#[command(name = "videoproc")]
#[command(about = "Script-driven video transformation engine")]
struct Args {
    /// Input video (local file or rtsp:// URI)
    #[arg(short, long)]
    input: String,

    /// Output video file
    #[arg(short, long, default_value = "output.mp4")]
    output: String,

    /// Script file processed for each frame
    #[arg(long)]
    frame_script: PathBuf,

    /// Script file processed for each pair of adjacent frames
    #[arg(long)]
    interframe_script: PathBuf,

    /// Frames buffered when reading video frames
    #[arg(long, default_value_t = 50)]
    input_buffer: usize,

    /// Packets buffered at each processing stage (minimum 3)
    #[arg(long, default_value_t = 50)]
    packet_buffer: usize,

    /// Frames buffered when writing video frames
    #[arg(long, default_value_t = 50)]
    output_buffer: usize,

    /// Horizontal tile cutoff
    #[arg(long, default_value_t = 512)]
    xcutoff: u32,

    /// Vertical tile cutoff
    #[arg(long, default_value_t = 512)]
    ycutoff: u32,

    /// Worker pool size (0 = all available cores)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Timeout in seconds after which processing is aborted
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Write a Markdown diagnostics report after the run
    #[arg(long)]
    diagnostics: Option<PathBuf>,

    /// Suppress the progress display
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = PipelineConfig {
        input: InputKind::from_uri(&args.input),
        output: args.output,
        frame_script: args.frame_script,
        interframe_script: args.interframe_script,
        input_buffer: args.input_buffer,
        packet_buffer: args.packet_buffer,
        output_buffer: args.output_buffer,
        cutoff_x: args.xcutoff,
        cutoff_y: args.ycutoff,
        threads: args.threads,
        timeout_secs: args.timeout,
        diagnostics: args.diagnostics,
        quiet: args.quiet,
    };

    // A failed run prints its single diagnostic to stderr and exits 1.
    videoproc::run(config).await?;
    Ok(())
}
