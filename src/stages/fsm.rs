//! Per-stage state machine.
//!
//! `Initializing -> WaitingForData <-> ProcessingData`, with a terminal
//! `Finished`. Leaving `Initializing` fires the stage's one-shot
//! `initialized` hook; the supervisor counts these to coordinate the start.
//! Invalid transitions are logged and ignored.

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Initializing,
    WaitingForData,
    ProcessingData,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    InitializeDone,
    ProcessData,
    ProcessDataDone,
    Finished,
}

pub struct StageFsm {
    name: &'static str,
    state: StageState,
    on_initialized: Option<Box<dyn FnOnce() + Send>>,
}

impl StageFsm {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: StageState::Initializing,
            on_initialized: None,
        }
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Hook fired exactly once when the stage leaves `Initializing`.
    pub fn on_initialized(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.on_initialized = Some(Box::new(hook));
    }

    pub fn process(&mut self, event: StageEvent) {
        let next = match (self.state, event) {
            (StageState::Initializing, StageEvent::InitializeDone) => StageState::WaitingForData,
            (StageState::WaitingForData, StageEvent::ProcessData) => StageState::ProcessingData,
            (StageState::ProcessingData, StageEvent::ProcessDataDone) => StageState::WaitingForData,
            (_, StageEvent::Finished) => StageState::Finished,
            (state, event) => {
                warn!(stage = self.name, ?state, ?event, "ignoring invalid stage transition");
                return;
            }
        };

        if self.state == StageState::Initializing && next == StageState::WaitingForData {
            if let Some(hook) = self.on_initialized.take() {
                hook();
            }
        }
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn initialized_hook_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut fsm = StageFsm::new("test");
        let counter = Arc::clone(&fired);
        fsm.on_initialized(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        fsm.process(StageEvent::InitializeDone);
        assert_eq!(fsm.state(), StageState::WaitingForData);
        // A second InitializeDone is invalid and must not re-fire the hook.
        fsm.process(StageEvent::InitializeDone);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn processing_round_trip() {
        let mut fsm = StageFsm::new("test");
        fsm.process(StageEvent::InitializeDone);
        fsm.process(StageEvent::ProcessData);
        assert_eq!(fsm.state(), StageState::ProcessingData);
        fsm.process(StageEvent::ProcessDataDone);
        assert_eq!(fsm.state(), StageState::WaitingForData);
    }

    #[test]
    fn invalid_transition_is_ignored() {
        let mut fsm = StageFsm::new("test");
        fsm.process(StageEvent::ProcessData);
        assert_eq!(fsm.state(), StageState::Initializing);
    }

    #[test]
    fn finished_is_terminal_from_anywhere() {
        let mut fsm = StageFsm::new("test");
        fsm.process(StageEvent::InitializeDone);
        fsm.process(StageEvent::Finished);
        assert_eq!(fsm.state(), StageState::Finished);
    }
}
