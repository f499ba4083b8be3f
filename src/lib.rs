//! # videoproc
//!
//! A staged video transformation engine: decode a video (local container or
//! RTSP stream), run a user-supplied script on every frame and another on
//! every adjacent frame pair, re-encode the result to an output container.
//!
//! ## Architecture
//!
//! Four stage actors connected by bounded staging buffers with demand-driven
//! backpressure:
//!
//! ```text
//! ┌────────┐    ┌─────────────┐    ┌──────────────┐    ┌──────┐
//! │ Source │───▶│ Frame       │───▶│ Inter-frame  │───▶│ Sink │
//! │        │    │ processor   │    │ processor    │    │      │
//! └────────┘    └─────────────┘    └──────────────┘    └──────┘
//!     ▲  next (demand) │  ▲  next (demand) │  ▲  next (demand)
//!     └────────────────┘  └────────────────┘  └───────────────┘
//! ```
//!
//! - Each stage is a tokio task owning a message inbox; per-stage state is
//!   single-threaded while stages run concurrently.
//! - Script evaluation happens on a shared rayon worker pool, parallel
//!   across frames and across tiles within a frame (see the `vidscript`
//!   crate).
//! - Codec I/O goes through GStreamer behind narrow read/write traits.
//!
//! The [`run`] entry point wires everything for one context: validate the
//! configuration, compile the scripts, run the pipeline under the overall
//! timeout, optionally write the diagnostics report.

pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod stages;

use std::sync::Arc;
use std::time::Duration;

use vidscript::{ImageProcessor, Item};

use crate::codec::{GstReaderFactory, GstWriterFactory};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Pipeline;

pub use crate::config::InputKind;
pub use crate::error::PipelineResult as Result;

/// Run one transformation end to end.
///
/// # Errors
///
/// Any failure maps to one of the [`PipelineError`] kinds: configuration and
/// script problems surface before the pipeline starts, codec and evaluation
/// failures abort the context, and the overall deadline returns `Timeout`.
/// Partially written output files are left as-is.
pub async fn run(config: PipelineConfig) -> PipelineResult<()> {
    config.validate()?;

    let frame_script = PipelineConfig::read_script(&config.frame_script)?;
    let interframe_script = PipelineConfig::read_script(&config.interframe_script)?;

    let processor = Arc::new(ImageProcessor::with_threads(config.threads)?);
    processor.add_param("cutoff_x", Item::SignedInteger(config.cutoff_x as i32));
    processor.add_param("cutoff_y", Item::SignedInteger(config.cutoff_y as i32));

    let progress = (!config.quiet).then(progress::spawn);

    let mut pipeline = Pipeline::new(
        Arc::clone(&processor),
        Arc::new(GstReaderFactory),
        Arc::new(GstWriterFactory),
        &config,
        progress,
    );

    let outcome = tokio::time::timeout(
        Duration::from_secs(config.timeout_secs),
        pipeline.run(
            config.input.uri(),
            &config.output,
            &frame_script,
            &interframe_script,
        ),
    )
    .await;

    let result = match outcome {
        Ok(result) => result,
        Err(_elapsed) => {
            pipeline.teardown(pipeline.current_context());
            Err(PipelineError::timeout(config.timeout_secs))
        }
    };

    if let Some(path) = &config.diagnostics {
        progress::write_diagnostics(path, &processor.timing_report())?;
    }

    result
}
