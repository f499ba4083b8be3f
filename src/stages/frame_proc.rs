//! Frame processor stage: evaluate the frame script on every frame.
//!
//! Per packet, every frame is evaluated concurrently against the worker
//! pool (each evaluation is itself parallel through the tiling scheduler);
//! the completed packet keeps the input packet's number. Completions arrive
//! on the actor inbox in whatever order the pool finishes them, so an
//! in-order release buffer holds them back until their packet number is
//! next — downstream always sees a dense packet sequence.
//!
//! Demand bookkeeping: the stage grants the source exactly as many frames
//! as it can absorb without overflowing its packet buffer
//! (`capacity - staged - in flight - already granted`), so the staging
//! buffer can never overflow while the protocol is honored.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use vidscript::ImageProcessor;

use crate::error::{PipelineError, PipelineResult};
use crate::model::{Frame, Packet, StageParams, UpdateIndicator};
use crate::stages::fsm::{StageEvent, StageFsm};
use crate::stages::staging::StagingBuffer;
use crate::stages::ProcessorCallbacks;

pub enum FrameProcCmd {
    Init {
        context_id: u64,
        script: String,
        callbacks: ProcessorCallbacks,
    },
    Params {
        context_id: u64,
        params: StageParams,
    },
    Process {
        context_id: u64,
        packet: Packet,
    },
    Next {
        context_id: u64,
        demand: usize,
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
    /// Internal: a packet's evaluations completed on the pool.
    Evaluated {
        context_id: u64,
        result: PipelineResult<Packet>,
    },
}

#[derive(Clone)]
pub struct FrameProcHandle {
    tx: mpsc::UnboundedSender<FrameProcCmd>,
}

impl FrameProcHandle {
    pub fn init(&self, context_id: u64, script: String, callbacks: ProcessorCallbacks) {
        let _ = self.tx.send(FrameProcCmd::Init {
            context_id,
            script,
            callbacks,
        });
    }

    pub fn params(&self, context_id: u64, params: StageParams) {
        let _ = self.tx.send(FrameProcCmd::Params { context_id, params });
    }

    pub fn process(&self, context_id: u64, packet: Packet) {
        let _ = self.tx.send(FrameProcCmd::Process { context_id, packet });
    }

    pub fn next(&self, context_id: u64, demand: usize) {
        let _ = self.tx.send(FrameProcCmd::Next { context_id, demand });
    }

    pub fn start(&self, context_id: u64) {
        let _ = self.tx.send(FrameProcCmd::Start { context_id });
    }

    pub fn finish(&self, context_id: u64) {
        let _ = self.tx.send(FrameProcCmd::Finish { context_id });
    }

    pub fn teardown(&self, context_id: u64) {
        let _ = self.tx.send(FrameProcCmd::Teardown { context_id });
    }
}

struct FrameProcContext {
    compile_id: usize,
    callbacks: ProcessorCallbacks,
    staging: StagingBuffer<Packet>,
    fsm: StageFsm,
    /// Completed packets waiting for their turn, keyed by packet number.
    release: BTreeMap<u64, Packet>,
    next_release: u64,
    in_flight: usize,
    /// Frames granted upstream but not yet received.
    granted: usize,
    prev_stage_finished: bool,
    failed: bool,
}

struct FrameProcStage {
    processor: Arc<ImageProcessor>,
    buffer_capacity: usize,
    contexts: HashMap<u64, FrameProcContext>,
    self_tx: mpsc::UnboundedSender<FrameProcCmd>,
}

/// Spawn the frame-processor actor and return its handle.
pub fn spawn(processor: Arc<ImageProcessor>, buffer_capacity: usize) -> FrameProcHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = FrameProcHandle { tx: tx.clone() };

    tokio::spawn(async move {
        let mut stage = FrameProcStage {
            processor,
            buffer_capacity,
            contexts: HashMap::new(),
            self_tx: tx,
        };
        while let Some(cmd) = rx.recv().await {
            stage.handle(cmd);
        }
    });

    handle
}

/// Evaluate every frame of a packet concurrently; the sentinel and the
/// packet number pass through untouched.
pub(crate) async fn evaluate_packet(
    processor: Arc<ImageProcessor>,
    compile_id: usize,
    packet: Packet,
    stage: &'static str,
) -> PipelineResult<Packet> {
    let number = packet.number();
    let mut slots: Vec<(u64, oneshot::Receiver<PipelineResult<Frame>>)> = Vec::new();
    let mut sentinel = false;

    for frame in packet.into_frames() {
        if frame.is_flush() {
            sentinel = true;
            continue;
        }
        let frame_number = frame.number();
        let image = frame.into_image().expect("non-flush frame has an image");
        let (tx, rx) = oneshot::channel();
        processor.evaluate_with(compile_id, image, None, move |result| {
            let _ = tx.send(
                result
                    .map_err(|e| PipelineError::processing(stage, e.to_string()))
                    .and_then(|item| {
                        item.into_image()
                            .map(|image| Frame::new(frame_number, image))
                            .map_err(|e| PipelineError::processing(stage, e.to_string()))
                    }),
            );
        });
        slots.push((frame_number, rx));
    }

    let mut frames = Vec::with_capacity(slots.len() + sentinel as usize);
    for result in join_all(slots.into_iter().map(|(_, rx)| rx)).await {
        let frame = result
            .map_err(|_| PipelineError::processing(stage, "evaluation dropped"))??;
        frames.push(frame);
    }
    if sentinel {
        frames.push(Frame::sentinel());
    }

    Ok(Packet::with_frames(number, frames))
}

impl FrameProcStage {
    fn handle(&mut self, cmd: FrameProcCmd) {
        match cmd {
            FrameProcCmd::Init {
                context_id,
                script,
                callbacks,
            } => self.init(context_id, script, callbacks),
            FrameProcCmd::Params { context_id, params } => {
                if let Some(context) = self.contexts.get(&context_id) {
                    (context.callbacks.params)(context_id, params);
                }
            }
            FrameProcCmd::Process { context_id, packet } => self.process(context_id, packet),
            FrameProcCmd::Next { context_id, demand } => {
                if let Some(context) = self.contexts.get_mut(&context_id) {
                    context.staging.request(demand);
                }
                self.flush(context_id);
            }
            FrameProcCmd::Start { context_id } => self.request_more(context_id),
            FrameProcCmd::Finish { context_id } => {
                if let Some(context) = self.contexts.get_mut(&context_id) {
                    context.prev_stage_finished = true;
                }
            }
            FrameProcCmd::Teardown { context_id } => {
                self.contexts.remove(&context_id);
            }
            FrameProcCmd::Evaluated { context_id, result } => {
                self.evaluated(context_id, result)
            }
        }
    }

    fn init(&mut self, context_id: u64, script: String, callbacks: ProcessorCallbacks) {
        match self.processor.compile(&script) {
            Ok(compile_id) => {
                debug!(context_id, compile_id, "frame script compiled");
                let mut context = FrameProcContext {
                    compile_id,
                    callbacks,
                    staging: StagingBuffer::new("frame", self.buffer_capacity, 1),
                    fsm: StageFsm::new("frame"),
                    release: BTreeMap::new(),
                    next_release: 0,
                    in_flight: 0,
                    granted: 0,
                    prev_stage_finished: false,
                    failed: false,
                };
                let initialized =
                    std::mem::replace(&mut context.callbacks.initialized, Box::new(|_| {}));
                context.fsm.on_initialized(move || initialized(context_id));
                context.fsm.process(StageEvent::InitializeDone);
                self.contexts.insert(context_id, context);
            }
            Err(e) => {
                let e: PipelineError = e.into();
                (callbacks.failed)(context_id, e.to_string());
            }
        }
    }

    fn process(&mut self, context_id: u64, packet: Packet) {
        let Some(context) = self.contexts.get_mut(&context_id) else {
            return;
        };
        if context.failed {
            return;
        }
        context.granted = context.granted.saturating_sub(packet.frames().len());
        context.in_flight += 1;

        if packet.is_flush() && packet.frames().iter().all(Frame::is_flush) {
            // Nothing to evaluate; enqueue the flush packet directly.
            let _ = self.self_tx.send(FrameProcCmd::Evaluated {
                context_id,
                result: Ok(packet),
            });
            return;
        }

        let processor = Arc::clone(&self.processor);
        let compile_id = context.compile_id;
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = evaluate_packet(processor, compile_id, packet, "frame").await;
            let _ = self_tx.send(FrameProcCmd::Evaluated { context_id, result });
        });
    }

    fn evaluated(&mut self, context_id: u64, result: PipelineResult<Packet>) {
        let Some(context) = self.contexts.get_mut(&context_id) else {
            return;
        };
        if context.failed {
            return;
        }

        let packet = match result {
            Ok(packet) => packet,
            Err(e) => {
                context.failed = true;
                (context.callbacks.update)(context_id, UpdateIndicator::new("frame", 0, 1));
                (context.callbacks.failed)(context_id, e.to_string());
                return;
            }
        };

        (context.callbacks.update)(
            context_id,
            UpdateIndicator::new("frame", packet.frames().len() as u64, 0),
        );
        context.release.insert(packet.number(), packet);

        // Release completed packets in packet-number order. A packet counts
        // as in flight until it is staged, so the demand ledger also covers
        // out-of-order completions parked here.
        while let Some(packet) = context.release.remove(&context.next_release) {
            context.next_release += 1;
            context.in_flight = context.in_flight.saturating_sub(1);
            if let Err(e) = context.staging.add([packet]) {
                context.failed = true;
                (context.callbacks.failed)(context_id, e.to_string());
                return;
            }
        }

        self.flush(context_id);
    }

    fn flush(&mut self, context_id: u64) {
        let Some(context) = self.contexts.get_mut(&context_id) else {
            return;
        };
        if context.failed {
            return;
        }

        while let Some(packets) = context.staging.try_flush() {
            for packet in packets {
                let is_last = packet.is_flush();
                (context.callbacks.deliver)(context_id, packet);
                if is_last {
                    context.fsm.process(StageEvent::Finished);
                    (context.callbacks.finished)(context_id);
                    return;
                }
            }
            context.staging.delivery_done();
        }

        self.request_more(context_id);
    }

    /// Grant the source as many frames as this stage can absorb.
    fn request_more(&mut self, context_id: u64) {
        let Some(context) = self.contexts.get_mut(&context_id) else {
            return;
        };
        if context.failed || context.prev_stage_finished {
            return;
        }
        let used = context.staging.len() + context.in_flight + context.granted;
        let headroom = self.buffer_capacity.saturating_sub(used);
        if headroom > 0 {
            context.granted += headroom;
            (context.callbacks.next)(context_id, headroom);
        }
    }
}
