//! Source stage: decode input into numbered frames under demand.
//!
//! One actor serves both source variants; the difference between a local
//! container and an RTSP stream lives entirely in the injected
//! [`OpenVideoRead`] factory. The decode loop fills the staging buffer while
//! it has free capacity, assigns monotone frame numbers from 0, and appends
//! exactly one flush sentinel at end of stream. Deliveries happen only
//! against downstream demand (`next`), counted in frames; whenever a
//! delivery frees capacity the loop reschedules itself through its own
//! inbox.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::codec::{OpenVideoRead, VideoRead};
use crate::model::{Frame, Packet, StageParams, UpdateIndicator};
use crate::stages::fsm::{StageEvent, StageFsm};
use crate::stages::staging::StagingBuffer;
use crate::stages::SourceCallbacks;

pub enum SourceCmd {
    Init {
        context_id: u64,
        uri: String,
        callbacks: SourceCallbacks,
    },
    Start {
        context_id: u64,
    },
    Next {
        context_id: u64,
        demand: usize,
    },
    Teardown {
        context_id: u64,
    },
}

/// Inbox handle of the source actor.
#[derive(Clone)]
pub struct SourceHandle {
    tx: mpsc::UnboundedSender<SourceCmd>,
}

impl SourceHandle {
    pub fn init(&self, context_id: u64, uri: String, callbacks: SourceCallbacks) {
        let _ = self.tx.send(SourceCmd::Init {
            context_id,
            uri,
            callbacks,
        });
    }

    pub fn start(&self, context_id: u64) {
        let _ = self.tx.send(SourceCmd::Start { context_id });
    }

    pub fn next(&self, context_id: u64, demand: usize) {
        let _ = self.tx.send(SourceCmd::Next { context_id, demand });
    }

    pub fn teardown(&self, context_id: u64) {
        let _ = self.tx.send(SourceCmd::Teardown { context_id });
    }
}

struct SourceContext {
    reader: Box<dyn VideoRead>,
    callbacks: SourceCallbacks,
    staging: StagingBuffer<Frame>,
    fsm: StageFsm,
    eof_reached: bool,
    failed: bool,
    next_frame_number: u64,
    packet_counter: u64,
}

struct SourceStage {
    opener: Arc<dyn OpenVideoRead>,
    buffer_capacity: usize,
    contexts: HashMap<u64, SourceContext>,
    self_tx: mpsc::UnboundedSender<SourceCmd>,
}

/// Spawn the source actor and return its handle.
pub fn spawn(opener: Arc<dyn OpenVideoRead>, buffer_capacity: usize) -> SourceHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = SourceHandle { tx: tx.clone() };

    tokio::spawn(async move {
        let mut stage = SourceStage {
            opener,
            buffer_capacity,
            contexts: HashMap::new(),
            self_tx: tx,
        };
        while let Some(cmd) = rx.recv().await {
            stage.handle(cmd).await;
        }
    });

    handle
}

impl SourceStage {
    async fn handle(&mut self, cmd: SourceCmd) {
        match cmd {
            SourceCmd::Init {
                context_id,
                uri,
                callbacks,
            } => self.init(context_id, uri, callbacks).await,
            SourceCmd::Start { context_id } => self.decode_some(context_id).await,
            SourceCmd::Next { context_id, demand } => self.next(context_id, demand),
            SourceCmd::Teardown { context_id } => {
                self.contexts.remove(&context_id);
            }
        }
    }

    async fn init(&mut self, context_id: u64, uri: String, mut callbacks: SourceCallbacks) {
        let reader = match self.opener.open(&uri).await {
            Ok(reader) => reader,
            Err(e) => {
                (callbacks.failed)(context_id, e.to_string());
                return;
            }
        };
        let info = reader.info();

        // Leaving Initializing fires the supervisor's initialized hook with
        // the total-frame estimate.
        let initialized = std::mem::replace(&mut callbacks.initialized, Box::new(|_, _| {}));
        let mut fsm = StageFsm::new("source");
        fsm.on_initialized(move || initialized(context_id, info.frame_estimate));

        let mut context = SourceContext {
            reader,
            callbacks,
            staging: StagingBuffer::new("source", self.buffer_capacity, usize::MAX),
            fsm,
            eof_reached: false,
            failed: false,
            next_frame_number: 0,
            packet_counter: 0,
        };

        let mut params = StageParams::new();
        params.insert("frames.width".to_string(), info.width as i64);
        params.insert("frames.height".to_string(), info.height as i64);
        (context.callbacks.params)(context_id, params);

        context.fsm.process(StageEvent::InitializeDone);

        debug!(context_id, uri, "source initialized");
        self.contexts.insert(context_id, context);
    }

    /// The decode loop: read while the staging buffer has room.
    async fn decode_some(&mut self, context_id: u64) {
        let Some(context) = self.contexts.get_mut(&context_id) else {
            return;
        };
        if context.eof_reached || context.failed {
            return;
        }
        context.fsm.process(StageEvent::ProcessData);

        while context.staging.free() > 0 && !context.eof_reached {
            match context.reader.read_frame().await {
                Ok(Some(image)) => {
                    let frame = Frame::new(context.next_frame_number, image);
                    context.next_frame_number += 1;
                    if let Err(e) = context.staging.add([frame]) {
                        context.failed = true;
                        (context.callbacks.failed)(context_id, e.to_string());
                        return;
                    }
                    (context.callbacks.update)(
                        context_id,
                        UpdateIndicator::new("load", 1, 0),
                    );
                }
                Ok(None) => {
                    context.eof_reached = true;
                    if let Err(e) = context.staging.add([Frame::sentinel()]) {
                        context.failed = true;
                        (context.callbacks.failed)(context_id, e.to_string());
                        return;
                    }
                    debug!(context_id, frames = context.next_frame_number, "source EOF");
                }
                Err(e) => {
                    context.failed = true;
                    (context.callbacks.update)(context_id, UpdateIndicator::new("load", 0, 1));
                    (context.callbacks.failed)(context_id, e.to_string());
                    return;
                }
            }
        }

        context.fsm.process(StageEvent::ProcessDataDone);
        self.flush(context_id);
    }

    fn next(&mut self, context_id: u64, demand: usize) {
        let Some(context) = self.contexts.get_mut(&context_id) else {
            return;
        };
        context.staging.request(demand);
        self.flush(context_id);
    }

    /// Drive deliveries; reschedule decoding when capacity frees up.
    fn flush(&mut self, context_id: u64) {
        let Some(context) = self.contexts.get_mut(&context_id) else {
            return;
        };
        if context.failed {
            return;
        }

        let mut refill = false;
        while let Some(frames) = context.staging.try_flush() {
            let is_last = frames.iter().any(Frame::is_flush);
            let packet = Packet::with_frames(context.packet_counter, frames);
            context.packet_counter += 1;
            (context.callbacks.deliver)(context_id, packet);

            // The downstream inbox accepted the batch; account for it and
            // check whether the decode loop should resume.
            refill |= context.staging.delivery_done();

            if is_last {
                context.fsm.process(StageEvent::Finished);
                (context.callbacks.finished)(context_id);
                return;
            }
        }

        if refill && !context.eof_reached {
            let _ = self.self_tx.send(SourceCmd::Start { context_id });
        }
    }
}
