//! Inter-frame processor stage: evaluate the inter-frame script on every
//! adjacent frame pair.
//!
//! Each evaluation needs two *adjacent* frames, so the stage reassembles a
//! contiguous window first: incoming frames land in a number-keyed buffer;
//! whenever the run starting at the cursor grows to `k >= 2` frames, those
//! frames are extracted (the last one stays behind as the left operand of
//! the next pair) and the `k - 1` pairs are evaluated concurrently. Pair
//! results are numbered by the context's running `frames_created` counter,
//! packets by `packets_created`, and an in-order release buffer keeps output
//! packet numbers dense no matter how the pool interleaves completions.
//!
//! The sentinel is tracked but never paired; once it has been seen, the
//! stage emits an empty flush packet carrying the next sequential packet
//! number.

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

pub enum InterframeCmd {
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
    /// Internal: one window's pair evaluations completed on the pool.
    Evaluated {
        context_id: u64,
        result: PipelineResult<Packet>,
    },
}

#[derive(Clone)]
pub struct InterframeHandle {
    tx: mpsc::UnboundedSender<InterframeCmd>,
}

impl InterframeHandle {
    pub fn init(&self, context_id: u64, script: String, callbacks: ProcessorCallbacks) {
        let _ = self.tx.send(InterframeCmd::Init {
            context_id,
            script,
            callbacks,
        });
    }

    pub fn params(&self, context_id: u64, params: StageParams) {
        let _ = self.tx.send(InterframeCmd::Params { context_id, params });
    }

    pub fn process(&self, context_id: u64, packet: Packet) {
        let _ = self.tx.send(InterframeCmd::Process { context_id, packet });
    }

    pub fn next(&self, context_id: u64, demand: usize) {
        let _ = self.tx.send(InterframeCmd::Next { context_id, demand });
    }

    pub fn start(&self, context_id: u64) {
        let _ = self.tx.send(InterframeCmd::Start { context_id });
    }

    pub fn finish(&self, context_id: u64) {
        let _ = self.tx.send(InterframeCmd::Finish { context_id });
    }

    pub fn teardown(&self, context_id: u64) {
        let _ = self.tx.send(InterframeCmd::Teardown { context_id });
    }
}

struct InterframeContext {
    compile_id: usize,
    callbacks: ProcessorCallbacks,
    fsm: StageFsm,
    /// Reassembly buffer keyed by frame number.
    input: BTreeMap<u64, Frame>,
    /// Next frame number not yet consumed as a left operand.
    next_frame: u64,
    flush_pending: bool,
    flush_submitted: bool,
    frames_created: u64,
    packets_created: u64,
    /// Completed output packets waiting for their turn.
    release: BTreeMap<u64, Packet>,
    next_release: u64,
    staging: StagingBuffer<Packet>,
    in_flight: usize,
    /// Packets granted upstream but not yet received.
    granted: usize,
    prev_stage_finished: bool,
    failed: bool,
}

struct InterframeStage {
    processor: Arc<ImageProcessor>,
    buffer_capacity: usize,
    contexts: HashMap<u64, InterframeContext>,
    self_tx: mpsc::UnboundedSender<InterframeCmd>,
}

/// Spawn the inter-frame actor and return its handle.
pub fn spawn(processor: Arc<ImageProcessor>, buffer_capacity: usize) -> InterframeHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = InterframeHandle { tx: tx.clone() };

    tokio::spawn(async move {
        let mut stage = InterframeStage {
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

/// Evaluate the script on each consecutive pair of `frames`; `k` frames
/// yield `k - 1` results numbered from `frames_offset`.
async fn evaluate_pairs(
    processor: Arc<ImageProcessor>,
    compile_id: usize,
    frames: Vec<Frame>,
    packet_number: u64,
    frames_offset: u64,
) -> PipelineResult<Packet> {
    let mut receivers: Vec<oneshot::Receiver<PipelineResult<Frame>>> = Vec::new();

    for (i, pair) in frames.windows(2).enumerate() {
        let left = pair[0]
            .image()
            .cloned()
            .ok_or_else(|| PipelineError::processing("interframe", "flush frame in pair window"))?;
        let right = pair[1]
            .image()
            .cloned()
            .ok_or_else(|| PipelineError::processing("interframe", "flush frame in pair window"))?;
        let number = frames_offset + i as u64;
        let (tx, rx) = oneshot::channel();
        processor.evaluate_with(compile_id, left, Some(right), move |result| {
            let _ = tx.send(
                result
                    .map_err(|e| PipelineError::processing("interframe", e.to_string()))
                    .and_then(|item| {
                        item.into_image()
                            .map(|image| Frame::new(number, image))
                            .map_err(|e| PipelineError::processing("interframe", e.to_string()))
                    }),
            );
        });
        receivers.push(rx);
    }

    let mut out = Vec::with_capacity(receivers.len());
    for result in join_all(receivers).await {
        out.push(
            result
                .map_err(|_| PipelineError::processing("interframe", "evaluation dropped"))??,
        );
    }
    Ok(Packet::with_frames(packet_number, out))
}

impl InterframeStage {
    fn handle(&mut self, cmd: InterframeCmd) {
        match cmd {
            InterframeCmd::Init {
                context_id,
                script,
                callbacks,
            } => self.init(context_id, script, callbacks),
            InterframeCmd::Params { context_id, params } => {
                if let Some(context) = self.contexts.get(&context_id) {
                    (context.callbacks.params)(context_id, params);
                }
            }
            InterframeCmd::Process { context_id, packet } => self.process(context_id, packet),
            InterframeCmd::Next { context_id, demand } => {
                if let Some(context) = self.contexts.get_mut(&context_id) {
                    context.staging.request(demand);
                }
                self.flush(context_id);
            }
            InterframeCmd::Start { context_id } => self.request_more(context_id),
            InterframeCmd::Finish { context_id } => {
                if let Some(context) = self.contexts.get_mut(&context_id) {
                    context.prev_stage_finished = true;
                }
            }
            InterframeCmd::Teardown { context_id } => {
                self.contexts.remove(&context_id);
            }
            InterframeCmd::Evaluated { context_id, result } => {
                self.evaluated(context_id, result)
            }
        }
    }

    fn init(&mut self, context_id: u64, script: String, callbacks: ProcessorCallbacks) {
        match self.processor.compile(&script) {
            Ok(compile_id) => {
                debug!(context_id, compile_id, "interframe script compiled");
                let mut context = InterframeContext {
                    compile_id,
                    callbacks,
                    fsm: StageFsm::new("interframe"),
                    input: BTreeMap::new(),
                    next_frame: 0,
                    flush_pending: false,
                    flush_submitted: false,
                    frames_created: 0,
                    packets_created: 0,
                    release: BTreeMap::new(),
                    next_release: 0,
                    staging: StagingBuffer::new("interframe", self.buffer_capacity, 1),
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
        context.granted = context.granted.saturating_sub(1);

        for frame in packet.into_frames() {
            if frame.is_flush() {
                context.flush_pending = true;
            } else {
                context.input.insert(frame.number(), frame);
            }
        }

        self.try_process_input(context_id);
        self.request_more(context_id);
    }

    /// Extract the contiguous run at the cursor and fan out its pairs.
    fn try_process_input(&mut self, context_id: u64) {
        let Some(context) = self.contexts.get_mut(&context_id) else {
            return;
        };
        if context.failed {
            return;
        }

        // Count the contiguous frame numbers present from the cursor on.
        let mut run = 0u64;
        while context.input.contains_key(&(context.next_frame + run)) {
            run += 1;
        }

        if run >= 2 {
            context.fsm.process(StageEvent::ProcessData);

            let first = context.next_frame;
            let last = first + run - 1;
            let mut frames = Vec::with_capacity(run as usize);
            for number in first..last {
                frames.push(
                    context
                        .input
                        .remove(&number)
                        .expect("contiguous run verified above"),
                );
            }
            // The last frame stays buffered; it is the left operand of the
            // next pair.
            frames.push(context.input[&last].clone());
            context.next_frame = last;

            let packet_number = context.packets_created;
            let frames_offset = context.frames_created;
            context.packets_created += 1;
            context.frames_created += run - 1;
            context.in_flight += 1;

            let processor = Arc::clone(&self.processor);
            let compile_id = context.compile_id;
            let self_tx = self.self_tx.clone();
            tokio::spawn(async move {
                let result =
                    evaluate_pairs(processor, compile_id, frames, packet_number, frames_offset)
                        .await;
                let _ = self_tx.send(InterframeCmd::Evaluated { context_id, result });
            });

            context.fsm.process(StageEvent::ProcessDataDone);
        }

        // After the sentinel, whatever run existed has been submitted; emit
        // the empty flush packet with the next sequential number.
        if context.flush_pending && !context.flush_submitted {
            context.flush_submitted = true;
            let packet_number = context.packets_created;
            context.packets_created += 1;
            context.in_flight += 1;
            let _ = self.self_tx.send(InterframeCmd::Evaluated {
                context_id,
                result: Ok(Packet::new(packet_number)),
            });
        }
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
                (context.callbacks.update)(context_id, UpdateIndicator::new("interframe", 0, 1));
                (context.callbacks.failed)(context_id, e.to_string());
                return;
            }
        };

        if !packet.is_flush() {
            (context.callbacks.update)(
                context_id,
                UpdateIndicator::new("interframe", packet.frames().len() as u64, 0),
            );
        }
        context.release.insert(packet.number(), packet);

        // Output packet numbers stay dense regardless of completion order.
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

    /// Grant upstream as many packets as this stage can absorb.
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
