//! # vidscript
//!
//! Scripted image processing for the video transformation pipeline.
//!
//! ## Architecture
//!
//! The crate stacks four layers:
//!
//! 1. **Data model** — [`Image`] (planar 8-bit rasters with reference-counted
//!    channel buffers), [`Item`] (the typed value sum of the DSL),
//!    [`Histogram`].
//! 2. **Parser** — script text to a typed DAG of operation nodes, with
//!    overload resolution and argument validation at parse time.
//! 3. **Compiler** — topological ordering into an execution plan of
//!    single/sequence/parallel nodes, one closure per operation.
//! 4. **Runtime** — [`ImageProcessor`] deduplicates compiles by source hash
//!    and evaluates plans against a rayon worker pool; image-shaped
//!    operations run through the recursive [tiling](tiling) scheduler.
//!
//! ## Example
//!
//! ```rust
//! use vidscript::{Image, ImageProcessor};
//!
//! let processor = ImageProcessor::with_threads(0).unwrap();
//! let id = processor
//!     .compile("a = input(\"gray\", 8); b = mean(a, 3, 3, \"constant\"); b")
//!     .unwrap();
//! let frame = Image::new_gray(64, 64);
//! let result = processor.evaluate(id, frame).unwrap();
//! assert!(result.into_image().is_ok());
//! ```

pub mod compiler;
pub mod context;
pub mod error;
pub mod histogram;
pub mod image;
pub mod item;
pub mod ops;
pub mod parser;
pub mod processor;
pub mod tiling;

pub use context::ProcessingContext;
pub use error::{Result, ScriptError};
pub use histogram::Histogram;
pub use image::{Image, Metadata, MetadataValue};
pub use item::{Item, ItemType};
pub use parser::{Operation, OperationRegistry};
pub use processor::{ImageProcessor, OpTiming};
pub use tiling::{BorderMode, TileRect, TilingParams};
