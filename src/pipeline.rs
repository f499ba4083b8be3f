//! # Pipeline Supervisor
//!
//! Builds the four stage actors, wires their callback DAG and coordinates
//! the start. Forward edges carry params/packets/finish notifications
//! (source -> frame -> interframe -> sink); demand edges run backwards
//! (`next`). The supervisor collects one `initialized` event per stage and
//! only then starts the stages back to front, so demand reaches the source
//! only when the whole chain is ready.
//!
//! Failure handling is coarse by design: the first `failed` event tears the
//! context down across all stages and surfaces one diagnostic; a timeout is
//! enforced by the caller around [`Pipeline::run`]. Contexts are isolated,
//! so concurrent runs share the stage actors without sharing state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use vidscript::ImageProcessor;

use crate::codec::{OpenVideoRead, OpenVideoWrite};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::progress::ProgressHandle;
use crate::stages::{
    frame_proc, interframe, sink, source, ProcessorCallbacks, SinkCallbacks, SourceCallbacks,
};

/// Stage identity used in supervisor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageId {
    Source,
    Frame,
    Interframe,
    Sink,
}

enum PipelineEvent {
    Initialized {
        stage: StageId,
        /// Total-frame estimate; only meaningful for the source.
        total_frames: i64,
    },
    Finished,
    Failed {
        message: String,
    },
}

/// One end-to-end processing graph: four stage actors plus event plumbing.
pub struct Pipeline {
    source: source::SourceHandle,
    frame: frame_proc::FrameProcHandle,
    interframe: interframe::InterframeHandle,
    sink: sink::SinkHandle,
    progress: Option<ProgressHandle>,
    context_counter: u64,
}

impl Pipeline {
    pub fn new(
        processor: Arc<ImageProcessor>,
        reader_factory: Arc<dyn OpenVideoRead>,
        writer_factory: Arc<dyn OpenVideoWrite>,
        config: &PipelineConfig,
        progress: Option<ProgressHandle>,
    ) -> Self {
        Self {
            source: source::spawn(reader_factory, config.input_buffer),
            frame: frame_proc::spawn(Arc::clone(&processor), config.packet_buffer),
            interframe: interframe::spawn(processor, config.packet_buffer),
            sink: sink::spawn(writer_factory, config.output_buffer),
            progress,
            context_counter: 0,
        }
    }

    /// Run one context to completion. The caller owns the overall timeout.
    pub async fn run(
        &mut self,
        input_uri: &str,
        output_uri: &str,
        frame_script: &str,
        interframe_script: &str,
    ) -> PipelineResult<()> {
        self.context_counter += 1;
        let context_id = self.context_counter;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<PipelineEvent>();

        let event = |tx: &mpsc::UnboundedSender<PipelineEvent>, stage: StageId| {
            let tx = tx.clone();
            move |_ctx: u64, total_frames: i64| {
                let _ = tx.send(PipelineEvent::Initialized {
                    stage,
                    total_frames,
                });
            }
        };
        let fail_event = |tx: &mpsc::UnboundedSender<PipelineEvent>| {
            let tx = tx.clone();
            move |_ctx: u64, message: String| {
                let _ = tx.send(PipelineEvent::Failed { message });
            }
        };
        let update_edge = |progress: &Option<ProgressHandle>| {
            let progress = progress.clone();
            move |ctx: u64, indicator| {
                if let Some(progress) = &progress {
                    progress.update(ctx, indicator);
                }
            }
        };

        // Stages are initialized back to front: a downstream inbox must hold
        // its Init before an upstream stage can emit params or packets at it.

        // Sink, demand back to the interframe processor.
        {
            let interframe = self.interframe.clone();
            let initialized = event(&events_tx, StageId::Sink);
            let finished_tx = events_tx.clone();
            self.sink.init(
                context_id,
                output_uri.to_string(),
                SinkCallbacks {
                    initialized: Box::new(move |ctx| initialized(ctx, 0)),
                    next: Box::new(move |ctx, demand| interframe.next(ctx, demand)),
                    finished: Box::new(move |_ctx| {
                        let _ = finished_tx.send(PipelineEvent::Finished);
                    }),
                    failed: Box::new(fail_event(&events_tx)),
                    update: Box::new(update_edge(&self.progress)),
                },
            );
        }

        // Interframe processor -> sink, demand back to frame processor.
        {
            let sink = self.sink.clone();
            let sink_params = self.sink.clone();
            let sink_finish = self.sink.clone();
            let frame = self.frame.clone();
            let initialized = event(&events_tx, StageId::Interframe);
            self.interframe.init(
                context_id,
                interframe_script.to_string(),
                ProcessorCallbacks {
                    initialized: Box::new(move |ctx| initialized(ctx, 0)),
                    params: Box::new(move |ctx, params| sink_params.params(ctx, params)),
                    deliver: Box::new(move |ctx, packet| sink.process(ctx, packet)),
                    next: Box::new(move |ctx, demand| frame.next(ctx, demand)),
                    finished: Box::new(move |ctx| sink_finish.finish(ctx)),
                    failed: Box::new(fail_event(&events_tx)),
                    update: Box::new(update_edge(&self.progress)),
                },
            );
        }

        // Frame processor -> interframe processor, demand back to source.
        {
            let interframe = self.interframe.clone();
            let interframe_params = self.interframe.clone();
            let interframe_finish = self.interframe.clone();
            let source = self.source.clone();
            let initialized = event(&events_tx, StageId::Frame);
            self.frame.init(
                context_id,
                frame_script.to_string(),
                ProcessorCallbacks {
                    initialized: Box::new(move |ctx| initialized(ctx, 0)),
                    params: Box::new(move |ctx, params| interframe_params.params(ctx, params)),
                    deliver: Box::new(move |ctx, packet| interframe.process(ctx, packet)),
                    next: Box::new(move |ctx, demand| source.next(ctx, demand)),
                    finished: Box::new(move |ctx| interframe_finish.finish(ctx)),
                    failed: Box::new(fail_event(&events_tx)),
                    update: Box::new(update_edge(&self.progress)),
                },
            );
        }

        // Source -> frame processor.
        {
            let frame = self.frame.clone();
            let frame_params = self.frame.clone();
            let frame_finish = self.frame.clone();
            let initialized = event(&events_tx, StageId::Source);
            let progress = self.progress.clone();
            self.source.init(
                context_id,
                input_uri.to_string(),
                SourceCallbacks {
                    initialized: Box::new(move |ctx, total| {
                        if let Some(progress) = &progress {
                            progress.total(ctx, total);
                        }
                        initialized(ctx, total);
                    }),
                    params: Box::new(move |ctx, params| frame_params.params(ctx, params)),
                    deliver: Box::new(move |ctx, packet| frame.process(ctx, packet)),
                    finished: Box::new(move |ctx| frame_finish.finish(ctx)),
                    failed: Box::new(fail_event(&events_tx)),
                    update: Box::new(update_edge(&self.progress)),
                },
            );
        }
        drop(events_tx);

        let mut initialized = 0usize;
        loop {
            let Some(event) = events_rx.recv().await else {
                return Err(PipelineError::processing(
                    "pipeline",
                    "all stages dropped before completion",
                ));
            };
            match event {
                PipelineEvent::Initialized { stage, .. } => {
                    debug!(context_id, ?stage, "stage initialized");
                    initialized += 1;
                    if initialized == 4 {
                        // Start back to front so demand meets ready stages.
                        self.sink.start(context_id);
                        self.interframe.start(context_id);
                        self.frame.start(context_id);
                        self.source.start(context_id);
                    }
                }
                PipelineEvent::Finished => {
                    debug!(context_id, "context finished");
                    if let Some(progress) = &self.progress {
                        progress.finished(context_id);
                    }
                    self.teardown(context_id);
                    return Ok(());
                }
                PipelineEvent::Failed { message } => {
                    error!(context_id, message, "context failed");
                    self.teardown(context_id);
                    return Err(PipelineError::processing("pipeline", message));
                }
            }
        }
    }

    /// Drop all per-context stage state.
    pub fn teardown(&self, context_id: u64) {
        self.source.teardown(context_id);
        self.frame.teardown(context_id);
        self.interframe.teardown(context_id);
        self.sink.teardown(context_id);
    }

    /// The id the next `run` call will use; exposed for timeout teardown.
    pub fn current_context(&self) -> u64 {
        self.context_counter
    }
}
