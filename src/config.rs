//! # Pipeline Configuration
//!
//! Validated configuration shared by the CLI and the library entry point.
//! The CLI parses flags into a [`PipelineConfig`]; `validate()` enforces the
//! cross-field rules before any resource is opened, so misconfiguration is
//! reported as a single `config` error instead of a mid-run failure.
//!
//! | Parameter        | Default      | Constraint                      |
//! |------------------|--------------|---------------------------------|
//! | `input`          | required     | local path or `rtsp://` URI     |
//! | `output`         | `output.mp4` | writable path                   |
//! | `frame_script`   | required     | readable file                   |
//! | `interframe_script` | required  | readable file                   |
//! | `input_buffer`   | 50 frames    | >= 1                            |
//! | `packet_buffer`  | 50 packets   | >= 3                            |
//! | `output_buffer`  | 50 frames    | >= 1                            |
//! | `cutoff_x/y`     | 512 pixels   | >= 1                            |
//! | `threads`        | 0 (= host)   |                                 |
//! | `timeout`        | 10 seconds   | >= 1                            |

use std::path::PathBuf;

use crate::error::{PipelineError, PipelineResult};

/// Where the source stage reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    /// Local container file.
    File(String),
    /// RTSP network stream.
    Rtsp(String),
}

impl InputKind {
    pub fn from_uri(uri: &str) -> Self {
        if uri.starts_with("rtsp://") {
            Self::Rtsp(uri.to_string())
        } else {
            Self::File(uri.to_string())
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            Self::File(uri) | Self::Rtsp(uri) => uri,
        }
    }
}

/// Full configuration of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input: InputKind,
    pub output: String,
    pub frame_script: PathBuf,
    pub interframe_script: PathBuf,
    /// Frames buffered by the source stage.
    pub input_buffer: usize,
    /// Packets buffered at each processing stage.
    pub packet_buffer: usize,
    /// Frames buffered by the sink stage.
    pub output_buffer: usize,
    pub cutoff_x: u32,
    pub cutoff_y: u32,
    /// Worker pool size; 0 selects host parallelism.
    pub threads: usize,
    /// Overall wall-clock deadline in seconds.
    pub timeout_secs: u64,
    /// Optional Markdown timing report written after the run.
    pub diagnostics: Option<PathBuf>,
    /// Suppress the progress display.
    pub quiet: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: InputKind::File(String::new()),
            output: "output.mp4".to_string(),
            frame_script: PathBuf::new(),
            interframe_script: PathBuf::new(),
            input_buffer: 50,
            packet_buffer: 50,
            output_buffer: 50,
            cutoff_x: 512,
            cutoff_y: 512,
            threads: 0,
            timeout_secs: 10,
            diagnostics: None,
            quiet: false,
        }
    }
}

impl PipelineConfig {
    /// Check cross-field rules. Called once before the pipeline is built.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.input.uri().is_empty() {
            return Err(PipelineError::config("no input video given"));
        }
        if self.output.is_empty() {
            return Err(PipelineError::config("no output video given"));
        }
        if self.frame_script.as_os_str().is_empty() {
            return Err(PipelineError::config("no frame script given"));
        }
        if self.interframe_script.as_os_str().is_empty() {
            return Err(PipelineError::config("no interframe script given"));
        }
        if self.input_buffer == 0 {
            return Err(PipelineError::config("input buffer must hold at least 1 frame"));
        }
        if self.packet_buffer < 3 {
            return Err(PipelineError::config(
                "packet buffer must hold at least 3 packets",
            ));
        }
        if self.output_buffer == 0 {
            return Err(PipelineError::config(
                "output buffer must hold at least 1 frame",
            ));
        }
        if self.cutoff_x == 0 || self.cutoff_y == 0 {
            return Err(PipelineError::config("tile cutoffs must be at least 1"));
        }
        if self.timeout_secs == 0 {
            return Err(PipelineError::config("timeout must be at least 1 second"));
        }
        Ok(())
    }

    /// Read a script file, mapping failures to config errors.
    pub fn read_script(path: &PathBuf) -> PipelineResult<String> {
        std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!(
                "failed to read script '{}': {e}",
                path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PipelineConfig {
        PipelineConfig {
            input: InputKind::from_uri("in.mp4"),
            frame_script: PathBuf::from("frame.script"),
            interframe_script: PathBuf::from("inter.script"),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_a_complete_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn rejects_small_packet_buffer() {
        let config = PipelineConfig {
            packet_buffer: 2,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_missing_scripts() {
        let config = PipelineConfig {
            frame_script: PathBuf::new(),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn classifies_rtsp_uris() {
        assert_eq!(
            InputKind::from_uri("rtsp://camera/stream"),
            InputKind::Rtsp("rtsp://camera/stream".into())
        );
        assert_eq!(
            InputKind::from_uri("video.mp4"),
            InputKind::File("video.mp4".into())
        );
    }
}
