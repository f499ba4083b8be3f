//! Per-evaluation storage for script results.
//!
//! A [`ProcessingContext`] is created when an evaluation starts, populated by
//! each operation as it completes, read by successor operations, and dropped
//! at evaluation end. Items are cheap to clone (image planes are reference
//! counted), which lets parallel plan branches work against snapshots of the
//! context and merge their results afterwards.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Result, ScriptError};
use crate::image::Image;
use crate::item::Item;

/// Result id the first evaluation input is seeded under.
pub const INPUT_SLOT_1: u32 = 0;
/// Result id the second evaluation input is seeded under.
pub const INPUT_SLOT_2: u32 = 2;
/// First id the parser hands out; ids below are reserved for input slots.
pub const FIRST_RESULT_ID: u32 = 4;

/// Per-evaluation store mapping result ids to typed items.
#[derive(Debug, Clone, Default)]
pub struct ProcessingContext {
    items: HashMap<u32, Item>,
    durations: Vec<(String, Duration)>,
    last_stored: u32,
    params: HashMap<String, Item>,
}

impl ProcessingContext {
    pub fn new(params: HashMap<String, Item>) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    /// Store an operation result.
    pub fn store(&mut self, id: u32, item: Item) {
        self.items.insert(id, item);
        self.last_stored = id;
    }

    /// Record the wall-clock duration of one operation run.
    pub fn record_duration(&mut self, operation: &str, duration: Duration) {
        self.durations.push((operation.to_string(), duration));
    }

    pub fn load(&self, id: u32) -> Result<&Item> {
        self.items.get(&id).ok_or_else(|| {
            ScriptError::evaluate("context", format!("no item stored under id {id}"))
        })
    }

    /// Load an item that must be an image.
    pub fn load_image(&self, id: u32) -> Result<Image> {
        self.load(id)?.as_image().cloned()
    }

    /// The most recently stored item; the evaluation result.
    pub fn last_stored(&self) -> Result<Item> {
        self.load(self.last_stored).cloned()
    }

    pub fn param(&self, key: &str) -> Option<&Item> {
        self.params.get(key)
    }

    /// Integer parameter with a fallback, e.g. `cutoff_x`.
    pub fn param_usize(&self, key: &str, default: usize) -> usize {
        match self.params.get(key) {
            Some(Item::SignedInteger(v)) if *v > 0 => *v as usize,
            _ => default,
        }
    }

    /// Absorb results produced by a parallel branch.
    ///
    /// `last_stored` is left untouched; the plan's final node always runs
    /// after the merge and determines the evaluation result.
    pub fn merge(&mut self, branch: ProcessingContext) {
        self.items.extend(branch.items);
        self.durations.extend(branch.durations);
    }

    /// Recorded `(operation, duration)` pairs, in completion order.
    pub fn durations(&self) -> &[(String, Duration)] {
        &self.durations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_stored_tracks_insert_order() {
        let mut ctx = ProcessingContext::default();
        ctx.store(4, Item::SignedInteger(1));
        ctx.store(5, Item::SignedInteger(2));
        assert!(matches!(ctx.last_stored().unwrap(), Item::SignedInteger(2)));
    }

    #[test]
    fn merge_keeps_final_pointer() {
        let mut ctx = ProcessingContext::default();
        ctx.store(4, Item::SignedInteger(1));
        let mut branch = ctx.clone();
        branch.store(5, Item::SignedInteger(2));
        ctx.merge(branch);
        assert!(ctx.load(5).is_ok());
        assert!(matches!(ctx.last_stored().unwrap(), Item::SignedInteger(1)));
    }

    #[test]
    fn params_fall_back_to_default() {
        let mut params = HashMap::new();
        params.insert("cutoff_x".to_string(), Item::SignedInteger(128));
        let ctx = ProcessingContext::new(params);
        assert_eq!(ctx.param_usize("cutoff_x", 512), 128);
        assert_eq!(ctx.param_usize("cutoff_y", 512), 512);
    }
}
