//! # Container/Codec Glue
//!
//! The pipeline talks to containers through two narrow capabilities:
//! [`VideoRead`] (open a URI, learn `(width, height, frame estimate)`, pull
//! decoded frames until EOF) and [`VideoWrite`] (accept frames, finalize the
//! container). The GStreamer implementations below cover local files and
//! RTSP sources on the read side and MP4/H.264 on the write side; tests
//! inject in-memory fakes through the same traits.
//!
//! ## Pipelines
//!
//! Decode (file):
//! ```text
//! filesrc ! decodebin ! videoconvert ! videoscale ! video/x-raw,format=RGB ! appsink
//! ```
//! Decode (RTSP): same tail behind `rtspsrc location=... latency=200`.
//! Encode:
//! ```text
//! appsrc ! videoconvert ! video/x-raw,format=I420 ! x264enc ! h264parse ! mp4mux ! filesink
//! ```
//!
//! Both decode paths convert to packed RGB in GStreamer and split into the
//! engine's planar layout here, so file and network sources produce
//! identical pixel data for the same content.
//!
//! ## Threading
//!
//! Decoding runs on a dedicated OS thread that blocks on `pull_sample` and
//! feeds a bounded tokio channel; when the channel is full the decode thread
//! parks, which is what pauses the GStreamer pipeline while the source stage
//! is not draining. Encoding pushes into a blocking `appsrc` inside
//! `block_in_place`.

use async_trait::async_trait;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use once_cell::sync::OnceCell;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vidscript::Image;

use crate::error::{PipelineError, PipelineResult};

/// Output timebase is fixed at 1/25.
pub const OUTPUT_FRAMERATE: u64 = 25;

/// Discovered stream parameters.
#[derive(Debug, Clone, Copy)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    /// Total-frame estimate; 0 when unknown or endless.
    pub frame_estimate: i64,
}

/// Decoded-frame source.
#[async_trait]
pub trait VideoRead: Send {
    fn info(&self) -> StreamInfo;

    /// Next decoded frame; `None` at end of stream.
    async fn read_frame(&mut self) -> PipelineResult<Option<Image>>;
}

/// Encoded-frame sink.
#[async_trait]
pub trait VideoWrite: Send {
    async fn write_frame(&mut self, image: &Image) -> PipelineResult<()>;

    /// Drain the encoder and finalize the container.
    async fn finish(&mut self) -> PipelineResult<()>;
}

/// Opens a [`VideoRead`] for a URI. The source stage holds one of these so
/// tests can swap the codec layer for synthetic frames.
#[async_trait]
pub trait OpenVideoRead: Send + Sync {
    async fn open(&self, uri: &str) -> PipelineResult<Box<dyn VideoRead>>;
}

/// Opens a [`VideoWrite`] once the output dimensions are known.
#[async_trait]
pub trait OpenVideoWrite: Send + Sync {
    async fn open(
        &self,
        uri: &str,
        width: u32,
        height: u32,
    ) -> PipelineResult<Box<dyn VideoWrite>>;
}

static GST_INIT: OnceCell<()> = OnceCell::new();

fn ensure_gst() -> PipelineResult<()> {
    GST_INIT
        .get_or_try_init(|| {
            gst::init().map_err(|e| PipelineError::decode(format!("GStreamer init failed: {e}")))
        })
        .map(|_| ())
}

/// GStreamer-backed reader factory; picks the decode pipeline by URI scheme.
pub struct GstReaderFactory;

#[async_trait]
impl OpenVideoRead for GstReaderFactory {
    async fn open(&self, uri: &str) -> PipelineResult<Box<dyn VideoRead>> {
        // Opening blocks on preroll; keep it off the actor's runtime thread.
        let uri = uri.to_string();
        let reader = tokio::task::spawn_blocking(move || GstReader::open(&uri))
            .await
            .map_err(|e| PipelineError::decode(format!("open task failed: {e}")))??;
        Ok(Box::new(reader))
    }
}

/// GStreamer-backed writer factory (MP4/H.264).
pub struct GstWriterFactory;

#[async_trait]
impl OpenVideoWrite for GstWriterFactory {
    async fn open(
        &self,
        uri: &str,
        width: u32,
        height: u32,
    ) -> PipelineResult<Box<dyn VideoWrite>> {
        let writer = GstWriter::open(uri, width, height)?;
        Ok(Box::new(writer))
    }
}

struct GstReader {
    pipeline: gst::Pipeline,
    info: StreamInfo,
    /// First frame of a live stream, consumed while probing caps.
    pending: Option<Image>,
    frames: mpsc::Receiver<PipelineResult<Option<Image>>>,
    done: bool,
}

impl GstReader {
    fn open(uri: &str) -> PipelineResult<Self> {
        ensure_gst()?;

        let is_rtsp = uri.starts_with("rtsp://");
        let head = if is_rtsp {
            format!("rtspsrc location={uri} latency=200")
        } else {
            if !std::path::Path::new(uri).exists() {
                return Err(PipelineError::config(format!("input '{uri}' not found")));
            }
            format!("filesrc location={uri}")
        };
        let launch = format!(
            "{head} ! decodebin ! videoconvert ! videoscale \
             ! video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4"
        );

        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| PipelineError::decode(format!("failed to build decode pipeline: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| PipelineError::decode("decode pipeline is not a bin"))?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| PipelineError::decode("appsink element missing"))?;

        // Preroll to discover caps before any frame is delivered. Live
        // sources (RTSP) report NoPreroll; for those the pipeline goes
        // straight to Playing and the first sample doubles as the probe.
        pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| PipelineError::decode(format!("failed to open input: {e}")))?;
        let (state_result, _, _) = pipeline.state(gst::ClockTime::from_seconds(15));
        let live = match state_result {
            Ok(gst::StateChangeSuccess::NoPreroll) => true,
            Ok(_) => false,
            Err(_) => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(PipelineError::decode(format!("failed to preroll '{uri}'")));
            }
        };

        let (probe_sample, pending) = if live {
            pipeline
                .set_state(gst::State::Playing)
                .map_err(|e| PipelineError::decode(format!("failed to start decoding: {e}")))?;
            let sample = appsink
                .pull_sample()
                .map_err(|_| PipelineError::decode("no video stream found"))?;
            let image = sample_to_image(&sample)?;
            (sample, Some(image))
        } else {
            let sample = appsink
                .pull_preroll()
                .map_err(|_| PipelineError::decode("no video stream found"))?;
            (sample, None)
        };

        let caps = probe_sample
            .caps()
            .ok_or_else(|| PipelineError::decode("probe sample has no caps"))?;
        let video_info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|e| PipelineError::decode(format!("unreadable video caps: {e}")))?;
        let width = video_info.width();
        let height = video_info.height();

        // Frame-count estimate from duration and framerate; live streams
        // report no duration and stay at 0 (endless).
        let frame_estimate = pipeline
            .query_duration::<gst::ClockTime>()
            .map(|duration| {
                let fps = video_info.fps();
                let rate = if *fps.denom() == 0 {
                    OUTPUT_FRAMERATE as f64
                } else {
                    *fps.numer() as f64 / *fps.denom() as f64
                };
                (duration.seconds() as f64 * rate) as i64
            })
            .unwrap_or(0);

        if !live {
            pipeline
                .set_state(gst::State::Playing)
                .map_err(|e| PipelineError::decode(format!("failed to start decoding: {e}")))?;
        }

        // Decode thread: block on pull_sample, convert, feed the bounded
        // channel. A full channel parks this thread and with it the
        // GStreamer pipeline.
        let (tx, rx) = mpsc::channel::<PipelineResult<Option<Image>>>(4);
        let thread_sink = appsink.clone();
        let thread_pipeline = pipeline.clone();
        std::thread::Builder::new()
            .name("videoproc-decode".into())
            .spawn(move || loop {
                match thread_sink.pull_sample() {
                    Ok(sample) => {
                        let frame = sample_to_image(&sample);
                        let stop = frame.is_err();
                        if tx.blocking_send(frame.map(Some)).is_err() || stop {
                            break;
                        }
                    }
                    Err(_) => {
                        let message = if thread_sink.is_eos() {
                            Ok(None)
                        } else {
                            Err(bus_error(&thread_pipeline)
                                .unwrap_or_else(|| PipelineError::decode("decode aborted")))
                        };
                        let _ = tx.blocking_send(message);
                        break;
                    }
                }
            })
            .map_err(|e| PipelineError::decode(format!("failed to spawn decode thread: {e}")))?;

        debug!(uri, width, height, frame_estimate, "opened input");
        Ok(Self {
            pipeline,
            info: StreamInfo {
                width,
                height,
                frame_estimate: if is_rtsp { 0 } else { frame_estimate },
            },
            pending,
            frames: rx,
            done: false,
        })
    }
}

#[async_trait]
impl VideoRead for GstReader {
    fn info(&self) -> StreamInfo {
        self.info
    }

    async fn read_frame(&mut self) -> PipelineResult<Option<Image>> {
        if let Some(image) = self.pending.take() {
            return Ok(Some(image));
        }
        if self.done {
            return Ok(None);
        }
        match self.frames.recv().await {
            Some(Ok(Some(image))) => Ok(Some(image)),
            Some(Ok(None)) | None => {
                self.done = true;
                Ok(None)
            }
            Some(Err(e)) => {
                self.done = true;
                Err(e)
            }
        }
    }
}

impl Drop for GstReader {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

struct GstWriter {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    frames_sent: u64,
    uri: String,
}

impl GstWriter {
    fn open(uri: &str, width: u32, height: u32) -> PipelineResult<Self> {
        ensure_gst()?;

        let launch = format!(
            "appsrc name=src format=time block=true \
             caps=video/x-raw,format=RGB,width={width},height={height},framerate={OUTPUT_FRAMERATE}/1 \
             ! videoconvert ! video/x-raw,format=I420 \
             ! x264enc ! h264parse ! mp4mux ! filesink location={uri}"
        );

        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| PipelineError::encode(format!("failed to build encode pipeline: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| PipelineError::encode("encode pipeline is not a bin"))?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|e| e.downcast::<gst_app::AppSrc>().ok())
            .ok_or_else(|| PipelineError::encode("appsrc element missing"))?;
        appsrc.set_format(gst::Format::Time);
        appsrc.set_block(true);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| PipelineError::encode(format!("failed to open output '{uri}': {e}")))?;

        debug!(uri, width, height, "opened output");
        Ok(Self {
            pipeline,
            appsrc,
            frames_sent: 0,
            uri: uri.to_string(),
        })
    }
}

#[async_trait]
impl VideoWrite for GstWriter {
    async fn write_frame(&mut self, image: &Image) -> PipelineResult<()> {
        let data = interleave_rgb(image);
        let pts = self.frames_sent * (1_000_000_000 / OUTPUT_FRAMERATE);

        let mut buffer = gst::Buffer::with_size(data.len())
            .map_err(|e| PipelineError::encode(format!("buffer allocation failed: {e}")))?;
        {
            let buffer = buffer
                .get_mut()
                .ok_or_else(|| PipelineError::encode("encode buffer not writable"))?;
            buffer.set_pts(gst::ClockTime::from_nseconds(pts));
            buffer.set_duration(gst::ClockTime::from_nseconds(
                1_000_000_000 / OUTPUT_FRAMERATE,
            ));
            let mut map = buffer
                .map_writable()
                .map_err(|e| PipelineError::encode(format!("buffer map failed: {e}")))?;
            map.as_mut_slice().copy_from_slice(&data);
        }

        // appsrc blocks under encoder back-pressure.
        let appsrc = self.appsrc.clone();
        tokio::task::block_in_place(move || appsrc.push_buffer(buffer))
            .map_err(|e| PipelineError::encode(format!("encoder rejected frame: {e}")))?;

        self.frames_sent += 1;
        Ok(())
    }

    async fn finish(&mut self) -> PipelineResult<()> {
        let appsrc = self.appsrc.clone();
        let pipeline = self.pipeline.clone();
        let uri = self.uri.clone();
        let frames = self.frames_sent;

        tokio::task::block_in_place(move || {
            let _ = appsrc.end_of_stream();

            let bus = pipeline
                .bus()
                .ok_or_else(|| PipelineError::encode("encode pipeline has no bus"))?;
            // Wait for the muxer to write the container tail.
            match bus.timed_pop_filtered(
                gst::ClockTime::from_seconds(30),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            ) {
                Some(message) => {
                    if let gst::MessageView::Error(e) = message.view() {
                        let _ = pipeline.set_state(gst::State::Null);
                        return Err(PipelineError::encode(format!(
                            "encoding '{uri}' failed: {}",
                            e.error()
                        )));
                    }
                }
                None => {
                    warn!(uri, "timed out waiting for end-of-stream");
                }
            }

            pipeline
                .set_state(gst::State::Null)
                .map_err(|e| PipelineError::encode(format!("failed to close output: {e}")))?;
            debug!(uri, frames, "finalized output");
            Ok(())
        })
    }
}

impl Drop for GstWriter {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn bus_error(pipeline: &gst::Pipeline) -> Option<PipelineError> {
    let bus = pipeline.bus()?;
    while let Some(message) = bus.pop() {
        if let gst::MessageView::Error(e) = message.view() {
            return Some(PipelineError::decode(format!("{}", e.error())));
        }
    }
    None
}

/// Split a packed-RGB sample into the engine's planar layout.
fn sample_to_image(sample: &gst::Sample) -> PipelineResult<Image> {
    let caps = sample
        .caps()
        .ok_or_else(|| PipelineError::decode("sample without caps"))?;
    let info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| PipelineError::decode(format!("unreadable sample caps: {e}")))?;
    let buffer = sample
        .buffer()
        .ok_or_else(|| PipelineError::decode("sample without buffer"))?;
    let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &info)
        .map_err(|_| PipelineError::decode("failed to map decoded frame"))?;

    let width = info.width() as usize;
    let height = info.height() as usize;
    let stride = frame.plane_stride()[0] as usize;
    let data = frame
        .plane_data(0)
        .map_err(|_| PipelineError::decode("decoded frame has no plane data"))?;

    let mut r = Vec::with_capacity(width * height);
    let mut g = Vec::with_capacity(width * height);
    let mut b = Vec::with_capacity(width * height);
    for y in 0..height {
        let row = &data[y * stride..y * stride + width * 3];
        for px in row.chunks_exact(3) {
            r.push(px[0]);
            g.push(px[1]);
            b.push(px[2]);
        }
    }

    Image::rgb_from_planes(info.width(), info.height(), [r, g, b])
        .map_err(|e| PipelineError::decode(e.to_string()))
}

/// Pack a planar image into interleaved RGB for the encoder; grayscale
/// replicates its single plane.
fn interleave_rgb(image: &Image) -> Vec<u8> {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let stride = image.stride();
    let mut out = Vec::with_capacity(width * height * 3);

    let (r, g, b) = if image.is_rgb() {
        (image.plane(0), image.plane(1), image.plane(2))
    } else {
        (image.plane(0), image.plane(0), image.plane(0))
    };
    for y in 0..height {
        for x in 0..width {
            let i = y * stride + x;
            out.push(r[i]);
            out.push(g[i]);
            out.push(b[i]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleave_replicates_gray_planes() {
        let image = Image::gray_from_plane(2, 1, vec![10, 20]).unwrap();
        assert_eq!(interleave_rgb(&image), vec![10, 10, 10, 20, 20, 20]);
    }

    #[test]
    fn interleave_respects_padding() {
        let image = Image::from_planes(2, 2, 2, vec![vec![1, 2, 0, 0, 3, 4, 0, 0]]).unwrap();
        assert_eq!(
            interleave_rgb(&image),
            vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]
        );
    }
}
