//! Planar 8-bit image buffers.
//!
//! An [`Image`] is a raster of unsigned 8-bit samples stored as one owned,
//! contiguous buffer per channel. Channel buffers are reference counted, so
//! cloning an image only bumps refcounts; mutation happens by building fresh
//! planes and wrapping them into a new image. A row may carry `padding` extra
//! samples beyond `width` for alignment, so every plane has exactly
//! `(width + padding) * height` samples.
//!
//! Images optionally carry [`Metadata`]: an ordered key/value map used to
//! attach analysis results (e.g. inference outputs) to a frame as it moves
//! through the pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, ScriptError};

/// A value stored in image metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    /// A single scalar.
    Scalar(f64),
    /// A text value.
    Text(String),
    /// A list of text values.
    TextList(Vec<String>),
    /// An N-dimensional float array with explicit dimensions.
    FloatArray { dims: Vec<usize>, data: Vec<f32> },
}

/// Ordered key/value metadata attached to an image.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A planar 8-bit raster with 1 (grayscale) or 3 (RGB) channels.
#[derive(Debug, Clone)]
pub struct Image {
    width: u32,
    height: u32,
    padding: u32,
    planes: Vec<Arc<Vec<u8>>>,
    metadata: Option<Arc<Metadata>>,
}

impl Image {
    /// Create a zero-filled grayscale image.
    pub fn new_gray(width: u32, height: u32) -> Self {
        Self::zeroed(width, height, 0, 1)
    }

    /// Create a zero-filled RGB image.
    pub fn new_rgb(width: u32, height: u32) -> Self {
        Self::zeroed(width, height, 0, 3)
    }

    /// Create a zero-filled image with explicit row padding.
    pub fn zeroed(width: u32, height: u32, padding: u32, channels: usize) -> Self {
        debug_assert!(channels == 1 || channels == 3);
        let len = (width as usize + padding as usize) * height as usize;
        let planes = (0..channels).map(|_| Arc::new(vec![0u8; len])).collect();
        Self {
            width,
            height,
            padding,
            planes,
            metadata: None,
        }
    }

    /// Build an image from pre-filled planes.
    ///
    /// # Errors
    ///
    /// Fails if the channel count is not 1 or 3, or if any plane's length
    /// differs from `(width + padding) * height`.
    pub fn from_planes(
        width: u32,
        height: u32,
        padding: u32,
        planes: Vec<Vec<u8>>,
    ) -> Result<Self> {
        if planes.len() != 1 && planes.len() != 3 {
            return Err(ScriptError::Image(format!(
                "expected 1 or 3 channels, got {}",
                planes.len()
            )));
        }
        let expected = (width as usize + padding as usize) * height as usize;
        for (i, plane) in planes.iter().enumerate() {
            if plane.len() != expected {
                return Err(ScriptError::Image(format!(
                    "channel {} has {} samples, expected {}",
                    i,
                    plane.len(),
                    expected
                )));
            }
        }
        Ok(Self {
            width,
            height,
            padding,
            planes: planes.into_iter().map(Arc::new).collect(),
            metadata: None,
        })
    }

    /// Build a grayscale image from a single plane without padding.
    pub fn gray_from_plane(width: u32, height: u32, plane: Vec<u8>) -> Result<Self> {
        Self::from_planes(width, height, 0, vec![plane])
    }

    /// Build an RGB image from three planes without padding.
    pub fn rgb_from_planes(width: u32, height: u32, planes: [Vec<u8>; 3]) -> Result<Self> {
        Self::from_planes(width, height, 0, planes.into())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn padding(&self) -> u32 {
        self.padding
    }

    /// Samples per row, including padding.
    pub fn stride(&self) -> usize {
        self.width as usize + self.padding as usize
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    pub fn is_gray(&self) -> bool {
        self.planes.len() == 1
    }

    pub fn is_rgb(&self) -> bool {
        self.planes.len() == 3
    }

    /// Borrow one channel plane.
    pub fn plane(&self, channel: usize) -> &[u8] {
        &self.planes[channel]
    }

    /// Shared handle to one channel plane.
    pub fn plane_arc(&self, channel: usize) -> Arc<Vec<u8>> {
        Arc::clone(&self.planes[channel])
    }

    /// Sample at `(x, y)` in the given channel.
    pub fn sample(&self, channel: usize, x: u32, y: u32) -> u8 {
        self.planes[channel][y as usize * self.stride() + x as usize]
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_deref()
    }

    /// Return a copy of this image carrying the given metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(Arc::new(metadata));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_length_invariant() {
        let img = Image::zeroed(10, 4, 6, 3);
        for c in 0..3 {
            assert_eq!(img.plane(c).len(), 16 * 4);
        }
        assert_eq!(img.stride(), 16);
    }

    #[test]
    fn from_planes_rejects_bad_length() {
        let err = Image::from_planes(4, 4, 0, vec![vec![0u8; 15]]);
        assert!(err.is_err());
    }

    #[test]
    fn clone_shares_planes() {
        let img = Image::new_rgb(8, 8);
        let copy = img.clone();
        assert!(Arc::ptr_eq(&img.planes[0], &copy.planes[0]));
    }

    #[test]
    fn metadata_round_trip() {
        let mut meta = Metadata::new();
        meta.insert(
            "scores".into(),
            MetadataValue::FloatArray {
                dims: vec![2, 2],
                data: vec![0.1, 0.2, 0.3, 0.4],
            },
        );
        let img = Image::new_gray(2, 2).with_metadata(meta);
        assert!(matches!(
            img.metadata().unwrap().get("scores"),
            Some(MetadataValue::FloatArray { dims, .. }) if dims == &[2, 2]
        ));
    }
}
