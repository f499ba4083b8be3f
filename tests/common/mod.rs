//! Shared helpers for the integration suites: synthetic video sources and a
//! capturing sink, wired through the codec traits so no real container or
//! codec is touched.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use videoproc::codec::{OpenVideoRead, OpenVideoWrite, StreamInfo, VideoRead, VideoWrite};
use videoproc::error::{PipelineError, PipelineResult};
use vidscript::Image;

/// A gray frame whose every sample is `value`.
pub fn flat_gray(width: u32, height: u32, value: u8) -> Image {
    Image::gray_from_plane(width, height, vec![value; (width * height) as usize]).unwrap()
}

/// An RGB frame with per-channel constant values.
pub fn flat_rgb(width: u32, height: u32, rgb: [u8; 3]) -> Image {
    let len = (width * height) as usize;
    Image::rgb_from_planes(
        width,
        height,
        [vec![rgb[0]; len], vec![rgb[1]; len], vec![rgb[2]; len]],
    )
    .unwrap()
}

/// Counters shared between a synthetic source and a capturing sink, used to
/// observe backpressure.
#[derive(Default)]
pub struct FlowStats {
    pub frames_read: AtomicU64,
    pub frames_written: AtomicU64,
    pub max_outstanding: AtomicU64,
}

impl FlowStats {
    fn note_read(&self) {
        let read = self.frames_read.fetch_add(1, Ordering::SeqCst) + 1;
        let written = self.frames_written.load(Ordering::SeqCst);
        let outstanding = read.saturating_sub(written);
        self.max_outstanding.fetch_max(outstanding, Ordering::SeqCst);
    }

    fn note_write(&self) {
        self.frames_written.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct SyntheticReader {
    frames: VecDeque<Image>,
    info: StreamInfo,
    stats: Option<Arc<FlowStats>>,
}

#[async_trait]
impl VideoRead for SyntheticReader {
    fn info(&self) -> StreamInfo {
        self.info
    }

    async fn read_frame(&mut self) -> PipelineResult<Option<Image>> {
        // Yield so deliveries interleave with decoding, like a real decoder.
        tokio::task::yield_now().await;
        match self.frames.pop_front() {
            Some(image) => {
                if let Some(stats) = &self.stats {
                    stats.note_read();
                }
                Ok(Some(image))
            }
            None => Ok(None),
        }
    }
}

/// Opens [`SyntheticReader`]s over a fixed frame list.
pub struct SyntheticSource {
    frames: Vec<Image>,
    stats: Option<Arc<FlowStats>>,
}

impl SyntheticSource {
    pub fn new(frames: Vec<Image>) -> Self {
        Self {
            frames,
            stats: None,
        }
    }

    pub fn with_stats(frames: Vec<Image>, stats: Arc<FlowStats>) -> Self {
        Self {
            frames,
            stats: Some(stats),
        }
    }
}

#[async_trait]
impl OpenVideoRead for SyntheticSource {
    async fn open(&self, _uri: &str) -> PipelineResult<Box<dyn VideoRead>> {
        let info = match self.frames.first() {
            Some(image) => StreamInfo {
                width: image.width(),
                height: image.height(),
                frame_estimate: self.frames.len() as i64,
            },
            None => StreamInfo {
                width: 2,
                height: 2,
                frame_estimate: 0,
            },
        };
        Ok(Box::new(SyntheticReader {
            frames: self.frames.clone().into(),
            info,
            stats: self.stats.clone(),
        }))
    }
}

/// A source whose reader never produces a frame; used for timeout tests.
pub struct StallingSource;

struct StallingReader;

#[async_trait]
impl VideoRead for StallingReader {
    fn info(&self) -> StreamInfo {
        StreamInfo {
            width: 2,
            height: 2,
            frame_estimate: 0,
        }
    }

    async fn read_frame(&mut self) -> PipelineResult<Option<Image>> {
        futures_util::future::pending::<()>().await;
        unreachable!("pending future never resolves")
    }
}

#[async_trait]
impl OpenVideoRead for StallingSource {
    async fn open(&self, _uri: &str) -> PipelineResult<Box<dyn VideoRead>> {
        Ok(Box::new(StallingReader))
    }
}

/// Collects written frames in memory.
#[derive(Default)]
pub struct Captured {
    pub frames: Mutex<Vec<Image>>,
    pub finished: AtomicBool,
    pub opened_size: Mutex<Option<(u32, u32)>>,
}

pub struct CaptureSink {
    pub captured: Arc<Captured>,
    stats: Option<Arc<FlowStats>>,
    write_delay: Option<std::time::Duration>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            captured: Arc::new(Captured::default()),
            stats: None,
            write_delay: None,
        }
    }

    pub fn with_stats(stats: Arc<FlowStats>, write_delay: std::time::Duration) -> Self {
        Self {
            captured: Arc::new(Captured::default()),
            stats: Some(stats),
            write_delay: Some(write_delay),
        }
    }
}

struct CaptureWriter {
    captured: Arc<Captured>,
    stats: Option<Arc<FlowStats>>,
    write_delay: Option<std::time::Duration>,
}

#[async_trait]
impl VideoWrite for CaptureWriter {
    async fn write_frame(&mut self, image: &Image) -> PipelineResult<()> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.captured.frames.lock().unwrap().push(image.clone());
        if let Some(stats) = &self.stats {
            stats.note_write();
        }
        Ok(())
    }

    async fn finish(&mut self) -> PipelineResult<()> {
        self.captured.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl OpenVideoWrite for CaptureSink {
    async fn open(
        &self,
        _uri: &str,
        width: u32,
        height: u32,
    ) -> PipelineResult<Box<dyn VideoWrite>> {
        *self.captured.opened_size.lock().unwrap() = Some((width, height));
        Ok(Box::new(CaptureWriter {
            captured: Arc::clone(&self.captured),
            stats: self.stats.clone(),
            write_delay: self.write_delay,
        }))
    }
}

/// A writer factory that always fails to open; used for encode-error tests.
pub struct FailingSink;

#[async_trait]
impl OpenVideoWrite for FailingSink {
    async fn open(
        &self,
        uri: &str,
        _width: u32,
        _height: u32,
    ) -> PipelineResult<Box<dyn VideoWrite>> {
        Err(PipelineError::encode(format!("cannot open '{uri}'")))
    }
}
