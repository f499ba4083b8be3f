//! Progress monitor and diagnostics report.
//!
//! The monitor is an observer actor subscribed to per-stage update events;
//! it keeps per-context counters and renders a single status line on
//! stdout. It sits off the critical path: stages fire-and-forget updates
//! and never wait for it.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::Path;

use tokio::sync::mpsc;

use vidscript::OpTiming;

use crate::error::{PipelineError, PipelineResult};
use crate::model::UpdateIndicator;

enum ProgressMsg {
    Total { context_id: u64, frames: i64 },
    Update { context_id: u64, indicator: UpdateIndicator },
    Finished { context_id: u64 },
}

#[derive(Debug, Clone, Default)]
struct Counters {
    total: i64,
    loaded: u64,
    frames: u64,
    interframes: u64,
    saved: u64,
    failures: u64,
}

/// Handle for posting progress events; cheap to clone.
#[derive(Clone)]
pub struct ProgressHandle {
    tx: mpsc::UnboundedSender<ProgressMsg>,
}

impl ProgressHandle {
    pub fn total(&self, context_id: u64, frames: i64) {
        let _ = self.tx.send(ProgressMsg::Total { context_id, frames });
    }

    pub fn update(&self, context_id: u64, indicator: UpdateIndicator) {
        let _ = self.tx.send(ProgressMsg::Update {
            context_id,
            indicator,
        });
    }

    pub fn finished(&self, context_id: u64) {
        let _ = self.tx.send(ProgressMsg::Finished { context_id });
    }
}

/// Spawn the monitor actor.
pub fn spawn() -> ProgressHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut contexts: HashMap<u64, Counters> = HashMap::new();
        while let Some(msg) = rx.recv().await {
            match msg {
                ProgressMsg::Total { context_id, frames } => {
                    contexts.entry(context_id).or_default().total = frames;
                }
                ProgressMsg::Update {
                    context_id,
                    indicator,
                } => {
                    let counters = contexts.entry(context_id).or_default();
                    match indicator.stage {
                        "load" => counters.loaded += indicator.processed,
                        "frame" => counters.frames += indicator.processed,
                        "interframe" => counters.interframes += indicator.processed,
                        "save" => counters.saved += indicator.processed,
                        _ => {}
                    }
                    counters.failures += indicator.failed;
                    render(counters);
                }
                ProgressMsg::Finished { context_id } => {
                    if let Some(counters) = contexts.remove(&context_id) {
                        render(&counters);
                        println!();
                    }
                }
            }
        }
    });

    ProgressHandle { tx }
}

fn render(counters: &Counters) {
    let total = if counters.total > 0 {
        format!("/{}", counters.total)
    } else {
        String::new()
    };
    print!(
        "\rloaded {}{} | processed {} | paired {} | saved {}{}",
        counters.loaded,
        total,
        counters.frames,
        counters.interframes,
        counters.saved,
        if counters.failures > 0 {
            format!(" | failures {}", counters.failures)
        } else {
            String::new()
        }
    );
    let _ = std::io::stdout().flush();
}

/// Write the per-operation timing table collected during evaluation.
pub fn write_diagnostics(path: &Path, timings: &[OpTiming]) -> PipelineResult<()> {
    let mut out = String::from("# Processing diagnostics\n\n");
    out.push_str("| operation | runs | total | mean | min | max |\n");
    out.push_str("|-----------|------|-------|------|-----|-----|\n");
    for timing in timings {
        out.push_str(&format!(
            "| {} | {} | {:.2?} | {:.2?} | {:.2?} | {:.2?} |\n",
            timing.operation,
            timing.count,
            timing.total,
            timing.mean(),
            timing.min,
            timing.max,
        ));
    }
    std::fs::write(path, out)
        .map_err(|e| PipelineError::io_path("write diagnostics", path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn diagnostics_report_is_a_markdown_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diag.md");
        let timings = vec![OpTiming {
            operation: "mean".into(),
            count: 3,
            total: Duration::from_millis(30),
            min: Duration::from_millis(5),
            max: Duration::from_millis(15),
        }];
        write_diagnostics(&path, &timings).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("| operation |"));
        assert!(text.contains("| mean | 3 |"));
    }
}
