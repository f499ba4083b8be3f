//! Integration tests for the staged pipeline: ordering, flush handling,
//! failure propagation, backpressure and timeouts, all against synthetic
//! sources and a capturing sink.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{
    flat_gray, flat_rgb, CaptureSink, FailingSink, FlowStats, StallingSource, SyntheticSource,
};
use videoproc::config::{InputKind, PipelineConfig};
use videoproc::pipeline::Pipeline;
use vidscript::{Image, ImageProcessor, Item};

const IDENTITY_FRAME: &str = "a = input(\"rgb\", 8);\na";
const IDENTITY_PAIR: &str = "a = input(\"rgb\", 8);\nb = input(\"rgb\", 8, 2);\na";
const GRAY_FRAME: &str = "a = input(\"gray\", 8);\na";
const GRAY_DIFF: &str = "a = input(\"gray\", 8);\nb = input(\"gray\", 8, 2);\nc = diff(a, b, 0);\nc";

fn test_config() -> PipelineConfig {
    PipelineConfig {
        input: InputKind::from_uri("test-input"),
        output: "test-output".to_string(),
        input_buffer: 8,
        packet_buffer: 3,
        output_buffer: 8,
        quiet: true,
        ..Default::default()
    }
}

fn processor() -> Arc<ImageProcessor> {
    let processor = Arc::new(ImageProcessor::with_threads(2).unwrap());
    processor.add_param("cutoff_x", Item::SignedInteger(64));
    processor.add_param("cutoff_y", Item::SignedInteger(64));
    processor
}

async fn run_pipeline(
    frames: Vec<Image>,
    frame_script: &str,
    interframe_script: &str,
    config: PipelineConfig,
) -> (videoproc::error::PipelineResult<()>, Arc<common::Captured>) {
    let sink = CaptureSink::new();
    let captured = Arc::clone(&sink.captured);
    let mut pipeline = Pipeline::new(
        processor(),
        Arc::new(SyntheticSource::new(frames)),
        Arc::new(sink),
        &config,
        None,
    );
    let result = tokio::time::timeout(
        Duration::from_secs(20),
        pipeline.run("test-input", "test-output", frame_script, interframe_script),
    )
    .await
    .expect("pipeline must settle well before the outer guard");
    (result, captured)
}

/// Identity scripts on a 3-frame sequence: the pair stage collapses N
/// frames into N-1 outputs equal to frames 0 and 1.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identity_pipeline_emits_n_minus_one_frames() {
    let inputs = vec![
        flat_rgb(8, 6, [10, 20, 30]),
        flat_rgb(8, 6, [40, 50, 60]),
        flat_rgb(8, 6, [70, 80, 90]),
    ];
    let (result, captured) =
        run_pipeline(inputs.clone(), IDENTITY_FRAME, IDENTITY_PAIR, test_config()).await;

    result.unwrap();
    let frames = captured.frames.lock().unwrap();
    assert_eq!(frames.len(), 2);
    for (out, reference) in frames.iter().zip(&inputs) {
        for c in 0..3 {
            assert_eq!(out.plane(c), reference.plane(c));
        }
    }
    assert!(captured.finished.load(Ordering::SeqCst));
    assert_eq!(*captured.opened_size.lock().unwrap(), Some((8, 6)));
}

/// Frame order is preserved end to end across parallel evaluations.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn frame_order_is_stable() {
    let inputs: Vec<Image> = (0..60).map(|i| flat_rgb(4, 4, [i as u8, 0, 0])).collect();
    let (result, captured) =
        run_pipeline(inputs, IDENTITY_FRAME, IDENTITY_PAIR, test_config()).await;

    result.unwrap();
    let frames = captured.frames.lock().unwrap();
    assert_eq!(frames.len(), 59);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.plane(0)[0], i as u8, "frame {i} out of order");
    }
}

/// Two identical gray frames through an inter-frame diff: one all-zero
/// output frame.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interframe_diff_of_identical_frames_is_zero() {
    let inputs = vec![flat_gray(6, 4, 140), flat_gray(6, 4, 140)];
    let (result, captured) = run_pipeline(inputs, GRAY_FRAME, GRAY_DIFF, test_config()).await;

    result.unwrap();
    let frames = captured.frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].plane(0).iter().all(|&p| p == 0));
}

/// A single-frame input yields an empty flush and a finalized, 0-frame
/// output.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_frame_input_finalizes_empty_output() {
    let inputs = vec![flat_rgb(4, 4, [1, 2, 3])];
    let (result, captured) =
        run_pipeline(inputs, IDENTITY_FRAME, IDENTITY_PAIR, test_config()).await;

    result.unwrap();
    assert!(captured.frames.lock().unwrap().is_empty());
    assert!(captured.finished.load(Ordering::SeqCst));
}

/// With a small packet buffer and a slow sink, the source must pause its
/// read loop instead of racing ahead of the consumer.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn backpressure_bounds_outstanding_frames() {
    let stats = Arc::new(FlowStats::default());
    let config = PipelineConfig {
        input_buffer: 5,
        packet_buffer: 3,
        output_buffer: 4,
        ..test_config()
    };
    let inputs: Vec<Image> = (0..1000).map(|i| flat_rgb(4, 2, [(i % 251) as u8, 0, 0])).collect();

    let sink = CaptureSink::with_stats(Arc::clone(&stats), Duration::from_micros(200));
    let captured = Arc::clone(&sink.captured);
    let mut pipeline = Pipeline::new(
        processor(),
        Arc::new(SyntheticSource::with_stats(inputs, Arc::clone(&stats))),
        Arc::new(sink),
        &config,
        None,
    );
    tokio::time::timeout(
        Duration::from_secs(60),
        pipeline.run("test-input", "test-output", IDENTITY_FRAME, IDENTITY_PAIR),
    )
    .await
    .expect("pipeline must settle")
    .unwrap();

    assert_eq!(captured.frames.lock().unwrap().len(), 999);

    // Bound: source buffer + the per-stage packet windows + sink buffer,
    // far below the 1000 frames fed in.
    let bound = (5 + 4 * 3 * 5 + 4 + 8) as u64;
    let max = stats.max_outstanding.load(Ordering::SeqCst);
    assert!(
        max <= bound,
        "source ran {max} frames ahead of the sink (bound {bound})"
    );
}

/// A script rejected at compile time fails the context before any frame
/// flows.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_frame_script_fails_the_context() {
    let inputs = vec![flat_rgb(4, 4, [0, 0, 0]); 3];
    let (result, captured) =
        run_pipeline(inputs, "a = wobble(1);\na", IDENTITY_PAIR, test_config()).await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("unknown operation"));
    assert!(captured.frames.lock().unwrap().is_empty());
}

/// Encoder open failure propagates as a failed context.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn encoder_failure_fails_the_context() {
    let inputs = vec![flat_rgb(4, 4, [9, 9, 9]); 4];
    let mut pipeline = Pipeline::new(
        processor(),
        Arc::new(SyntheticSource::new(inputs)),
        Arc::new(FailingSink),
        &test_config(),
        None,
    );
    let result = tokio::time::timeout(
        Duration::from_secs(20),
        pipeline.run("test-input", "bad-output", IDENTITY_FRAME, IDENTITY_PAIR),
    )
    .await
    .expect("pipeline must settle");

    assert!(result.unwrap_err().to_string().contains("cannot open"));
}

/// A source that never produces data trips the caller's deadline; the
/// context can then be torn down.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stalled_source_hits_the_timeout() {
    let mut pipeline = Pipeline::new(
        processor(),
        Arc::new(StallingSource),
        Arc::new(CaptureSink::new()),
        &test_config(),
        None,
    );
    let outcome = tokio::time::timeout(
        Duration::from_millis(500),
        pipeline.run("test-input", "test-output", IDENTITY_FRAME, IDENTITY_PAIR),
    )
    .await;

    assert!(outcome.is_err(), "stalled pipeline must not complete");
    pipeline.teardown(pipeline.current_context());
}
