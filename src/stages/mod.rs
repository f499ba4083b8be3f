//! Pipeline stage actors.
//!
//! Each stage is an actor: a tokio task owning a message inbox. All of a
//! stage's per-context state is touched only from that task, which removes
//! intra-stage data races while stages run in parallel with each other.
//! Callbacks are outbound message edges: the supervisor wires each stage's
//! callback struct to the inbox of its neighbor, so the callback DAG mirrors
//! the stage DAG.
//!
//! Compute-heavy work (script evaluation) is dispatched to the shared worker
//! pool; completions are posted back to the owning actor's inbox as internal
//! messages, so results always resume on the stage's own logical thread.

pub mod fsm;
pub mod frame_proc;
pub mod interframe;
pub mod sink;
pub mod source;
pub mod staging;

use crate::model::{Packet, StageParams, UpdateIndicator};

/// Callback taking the context id and one payload.
pub type Callback<T> = Box<dyn Fn(u64, T) + Send + Sync>;
/// Callback taking only the context id.
pub type SimpleCallback = Box<dyn Fn(u64) + Send + Sync>;

/// Outbound edges of the source stage.
pub struct SourceCallbacks {
    /// Fired once after probing; carries the total-frame estimate
    /// (0 = unknown or endless).
    pub initialized: Callback<i64>,
    pub params: Callback<StageParams>,
    pub deliver: Callback<Packet>,
    pub finished: SimpleCallback,
    pub failed: Callback<String>,
    pub update: Callback<UpdateIndicator>,
}

/// Outbound edges of the frame and inter-frame processors.
pub struct ProcessorCallbacks {
    pub initialized: SimpleCallback,
    pub params: Callback<StageParams>,
    pub deliver: Callback<Packet>,
    /// Demand signal to the upstream stage.
    pub next: Callback<usize>,
    pub finished: SimpleCallback,
    pub failed: Callback<String>,
    pub update: Callback<UpdateIndicator>,
}

/// Outbound edges of the sink stage.
pub struct SinkCallbacks {
    pub initialized: SimpleCallback,
    /// Demand signal to the upstream stage.
    pub next: Callback<usize>,
    pub finished: SimpleCallback,
    pub failed: Callback<String>,
    pub update: Callback<UpdateIndicator>,
}
