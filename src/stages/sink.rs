//! Sink stage: encode frames into the output container in frame order.
//!
//! The container is opened at `init`; the encoder is configured only once
//! `params` delivers the output dimensions. Incoming frames land in an
//! out-of-order buffer keyed by frame number and the contiguous run
//! starting at `next_frame` is written out, stopping at the first gap. On
//! the flush packet the encoder is drained, the container gets its
//! sequence-end marker and `finished` is reported; the file is not closed
//! cleanly on failure.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use vidscript::Image;

use crate::codec::{OpenVideoWrite, VideoWrite};
use crate::error::PipelineError;
use crate::model::{Packet, StageParams, UpdateIndicator};
use crate::stages::fsm::{StageEvent, StageFsm};
use crate::stages::SinkCallbacks;

pub enum SinkCmd {
    Init {
        context_id: u64,
        uri: String,
        callbacks: SinkCallbacks,
    },
    Params {
        context_id: u64,
        params: StageParams,
    },
    Process {
        context_id: u64,
        packet: Packet,
    },
    Start {
        context_id: u64,
    },
    Finish {
        context_id: u64,
    },
    Teardown {
        context_id: u64,
    },
}

#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<SinkCmd>,
}

impl SinkHandle {
    pub fn init(&self, context_id: u64, uri: String, callbacks: SinkCallbacks) {
        let _ = self.tx.send(SinkCmd::Init {
            context_id,
            uri,
            callbacks,
        });
    }

    pub fn params(&self, context_id: u64, params: StageParams) {
        let _ = self.tx.send(SinkCmd::Params { context_id, params });
    }

    pub fn process(&self, context_id: u64, packet: Packet) {
        let _ = self.tx.send(SinkCmd::Process { context_id, packet });
    }

    pub fn start(&self, context_id: u64) {
        let _ = self.tx.send(SinkCmd::Start { context_id });
    }

    pub fn finish(&self, context_id: u64) {
        let _ = self.tx.send(SinkCmd::Finish { context_id });
    }

    pub fn teardown(&self, context_id: u64) {
        let _ = self.tx.send(SinkCmd::Teardown { context_id });
    }
}

struct SinkContext {
    uri: String,
    callbacks: SinkCallbacks,
    fsm: StageFsm,
    writer: Option<Box<dyn VideoWrite>>,
    /// Out-of-order frames keyed by frame number.
    pending: BTreeMap<u64, Image>,
    next_frame: u64,
    frames_written: u64,
    flush_seen: bool,
    prev_stage_finished: bool,
    failed: bool,
}

struct SinkStage {
    opener: Arc<dyn OpenVideoWrite>,
    buffer_capacity: usize,
    contexts: HashMap<u64, SinkContext>,
}

/// Spawn the sink actor and return its handle.
pub fn spawn(opener: Arc<dyn OpenVideoWrite>, buffer_capacity: usize) -> SinkHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = SinkHandle { tx };

    tokio::spawn(async move {
        let mut stage = SinkStage {
            opener,
            buffer_capacity,
            contexts: HashMap::new(),
        };
        while let Some(cmd) = rx.recv().await {
            stage.handle(cmd).await;
        }
    });

    handle
}

impl SinkStage {
    async fn handle(&mut self, cmd: SinkCmd) {
        match cmd {
            SinkCmd::Init {
                context_id,
                uri,
                callbacks,
            } => self.init(context_id, uri, callbacks),
            SinkCmd::Params { context_id, params } => self.params(context_id, params).await,
            SinkCmd::Process { context_id, packet } => self.process(context_id, packet).await,
            SinkCmd::Start { context_id } => {
                if let Some(context) = self.contexts.get(&context_id) {
                    if !context.prev_stage_finished {
                        (context.callbacks.next)(context_id, 1);
                    }
                }
            }
            SinkCmd::Finish { context_id } => {
                if let Some(context) = self.contexts.get_mut(&context_id) {
                    context.prev_stage_finished = true;
                }
            }
            SinkCmd::Teardown { context_id } => {
                self.contexts.remove(&context_id);
            }
        }
    }

    fn init(&mut self, context_id: u64, uri: String, callbacks: SinkCallbacks) {
        let mut context = SinkContext {
            uri,
            callbacks,
            fsm: StageFsm::new("sink"),
            writer: None,
            pending: BTreeMap::new(),
            next_frame: 0,
            frames_written: 0,
            flush_seen: false,
            prev_stage_finished: false,
            failed: false,
        };
        let initialized = std::mem::replace(&mut context.callbacks.initialized, Box::new(|_| {}));
        context.fsm.on_initialized(move || initialized(context_id));
        context.fsm.process(StageEvent::InitializeDone);
        self.contexts.insert(context_id, context);
    }

    /// Codec configuration is deferred until the dimensions are known.
    async fn params(&mut self, context_id: u64, params: StageParams) {
        let Some(context) = self.contexts.get_mut(&context_id) else {
            return;
        };
        if context.writer.is_some() {
            return;
        }
        let (width, height) = match (
            params.get("frames.width").copied(),
            params.get("frames.height").copied(),
        ) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w as u32, h as u32),
            _ => {
                context.failed = true;
                (context.callbacks.failed)(
                    context_id,
                    "missing frame dimensions for encoder setup".to_string(),
                );
                return;
            }
        };

        match self.opener.open(&context.uri, width, height).await {
            Ok(writer) => {
                debug!(context_id, width, height, "sink encoder configured");
                context.writer = Some(writer);
            }
            Err(e) => {
                context.failed = true;
                (context.callbacks.failed)(context_id, e.to_string());
            }
        }
    }

    async fn process(&mut self, context_id: u64, packet: Packet) {
        let Some(context) = self.contexts.get_mut(&context_id) else {
            return;
        };
        if context.failed {
            return;
        }
        if context.writer.is_none() {
            context.failed = true;
            (context.callbacks.failed)(
                context_id,
                "frames arrived before encoder configuration".to_string(),
            );
            return;
        }
        context.fsm.process(StageEvent::ProcessData);

        let is_last = packet.is_flush();
        for frame in packet.into_frames() {
            if frame.is_flush() {
                context.flush_seen = true;
                continue;
            }
            let number = frame.number();
            let image = frame.into_image().expect("non-flush frame has an image");
            context.pending.insert(number, image);
            if context.pending.len() > self.buffer_capacity {
                context.failed = true;
                (context.callbacks.failed)(
                    context_id,
                    PipelineError::buffer_overflow("sink").to_string(),
                );
                return;
            }
        }
        if is_last {
            context.flush_seen = true;
        }

        // Ordered flush: write the contiguous run, stop at the first gap.
        while let Some(image) = context.pending.remove(&context.next_frame) {
            let writer = context.writer.as_mut().expect("writer checked above");
            if let Err(e) = writer.write_frame(&image).await {
                context.failed = true;
                (context.callbacks.update)(context_id, UpdateIndicator::new("save", 0, 1));
                (context.callbacks.failed)(context_id, e.to_string());
                return;
            }
            context.next_frame += 1;
            context.frames_written += 1;
            (context.callbacks.update)(context_id, UpdateIndicator::new("save", 1, 0));
        }

        context.fsm.process(StageEvent::ProcessDataDone);

        if context.flush_seen {
            // Drain the encoder and write the container's sequence end.
            let writer = context.writer.as_mut().expect("writer checked above");
            if let Err(e) = writer.finish().await {
                context.failed = true;
                (context.callbacks.failed)(context_id, e.to_string());
                return;
            }
            context.fsm.process(StageEvent::Finished);
            debug!(
                context_id,
                frames = context.frames_written,
                "sink finalized output"
            );
            (context.callbacks.finished)(context_id);
        } else {
            (context.callbacks.next)(context_id, 1);
        }
    }
}
