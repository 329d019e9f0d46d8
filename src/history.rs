//! Undo/redo as an explicit command log with defined capacity and eviction.
//!
//! Strokes are recorded as rectangular pixel patches (before/after) rather
//! than whole-canvas snapshots; layer operations carry just enough state to
//! replay themselves in either direction. The manager evicts oldest-first
//! when it exceeds either the step cap or the memory budget.

use std::collections::VecDeque;

use image::Rgba;

use crate::canvas::{BlendMode, CanvasState, Layer, LayerId};
use crate::log_warn;
use crate::stroke::StrokeCommit;

/// Default memory budget for retained undo data (bytes).
const DEFAULT_MEMORY_BUDGET: usize = 256 * 1024 * 1024;

// ============================================================================
// COMMAND TRAIT
// ============================================================================

/// An undoable/redoable operation.
pub trait Command: Send + Sync {
    fn undo(&self, canvas: &mut CanvasState);
    fn redo(&self, canvas: &mut CanvasState);
    fn description(&self) -> String;
    fn memory_size(&self) -> usize;
}

// ============================================================================
// PIXEL PATCH - rectangular before/after pixel data
// ============================================================================

/// A rectangular patch of one layer's pixels.
#[derive(Clone)]
pub struct PixelPatch {
    pub layer_id: LayerId,
    /// (x, y, w, h) in canvas pixels, already clamped to canvas bounds.
    pub rect: (u32, u32, u32, u32),
    pub pixels: Vec<Rgba<u8>>,
}

impl PixelPatch {
    /// Capture `rect` from the layer's current pixels.
    pub fn capture(canvas: &CanvasState, layer_id: LayerId, rect: (u32, u32, u32, u32)) -> Self {
        let (x0, y0, w, h) = rect;
        let mut pixels = Vec::with_capacity((w * h) as usize);
        match canvas.layer(layer_id) {
            Some(layer) => {
                for y in y0..y0 + h {
                    for x in x0..x0 + w {
                        pixels.push(*layer.pixels.get_pixel(x, y));
                    }
                }
            }
            None => {
                log_warn!("PixelPatch::capture: unknown layer {}", layer_id);
            }
        }
        Self { layer_id, rect, pixels }
    }

    /// Capture the same rect from a detached buffer (the pre-stroke COW
    /// snapshot held by a `StrokeCommit`).
    pub fn from_buffer(
        buffer: &crate::canvas::TiledImage,
        layer_id: LayerId,
        rect: (u32, u32, u32, u32),
    ) -> Self {
        let (x0, y0, w, h) = rect;
        let mut pixels = Vec::with_capacity((w * h) as usize);
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                pixels.push(*buffer.get_pixel(x, y));
            }
        }
        Self { layer_id, rect, pixels }
    }

    pub fn apply(&self, canvas: &mut CanvasState) {
        let (x0, y0, w, h) = self.rect;
        let Some(layer) = canvas.layer_mut(self.layer_id) else {
            log_warn!("PixelPatch::apply: unknown layer {}", self.layer_id);
            return;
        };
        let mut idx = 0;
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                if idx < self.pixels.len() {
                    layer.pixels.put_pixel(x, y, self.pixels[idx]);
                }
                idx += 1;
            }
        }
        canvas.mark_dirty();
    }

    pub fn memory_size(&self) -> usize {
        self.pixels.len() * 4
    }
}

// ============================================================================
// BRUSH COMMAND
// ============================================================================

/// Before/after patches for one committed stroke.
pub struct BrushCommand {
    description: String,
    before: PixelPatch,
    after: PixelPatch,
}

impl BrushCommand {
    /// Build from a stroke commit: `before` comes from the pre-stroke COW
    /// snapshot, `after` from the layer's current pixels.
    pub fn from_commit(
        canvas: &CanvasState,
        commit: &StrokeCommit,
        description: impl Into<String>,
    ) -> Self {
        let before = PixelPatch::from_buffer(&commit.before, commit.layer_id, commit.bounds);
        let after = PixelPatch::capture(canvas, commit.layer_id, commit.bounds);
        Self {
            description: description.into(),
            before,
            after,
        }
    }
}

impl Command for BrushCommand {
    fn undo(&self, canvas: &mut CanvasState) {
        self.before.apply(canvas);
    }

    fn redo(&self, canvas: &mut CanvasState) {
        self.after.apply(canvas);
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.before.memory_size() + self.after.memory_size()
    }
}

// ============================================================================
// LAYER OPERATIONS
// ============================================================================

/// Replayable layer metadata, minus the pixel buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerProps {
    pub name: String,
    pub visible: bool,
    pub opacity: u8,
    pub blend_mode: BlendMode,
    pub locked: bool,
}

impl LayerProps {
    pub fn of(layer: &Layer) -> Self {
        Self {
            name: layer.name.clone(),
            visible: layer.visible,
            opacity: layer.opacity,
            blend_mode: layer.blend_mode,
            locked: layer.locked,
        }
    }

    fn apply_to(&self, layer: &mut Layer) {
        layer.name = self.name.clone();
        layer.visible = self.visible;
        layer.opacity = self.opacity;
        layer.blend_mode = self.blend_mode;
        layer.locked = self.locked;
    }
}

pub enum LayerOperation {
    Add {
        index: usize,
        layer: Layer,
        prev_active: LayerId,
    },
    Delete {
        index: usize,
        layer: Layer,
        was_active: bool,
    },
    Update {
        id: LayerId,
        before: LayerProps,
        after: LayerProps,
    },
}

pub struct LayerOpCommand {
    op: LayerOperation,
}

impl LayerOpCommand {
    pub fn new(op: LayerOperation) -> Self {
        Self { op }
    }
}

impl Command for LayerOpCommand {
    fn undo(&self, canvas: &mut CanvasState) {
        match &self.op {
            LayerOperation::Add { layer, prev_active, .. } => {
                if let Some(idx) = canvas.layer_index(layer.id) {
                    canvas.layers.remove(idx);
                    canvas.active_layer_id = *prev_active;
                    canvas.mark_dirty();
                }
            }
            LayerOperation::Delete { index, layer, was_active } => {
                let idx = (*index).min(canvas.layers.len());
                canvas.layers.insert(idx, layer.clone());
                if *was_active {
                    canvas.active_layer_id = layer.id;
                }
                canvas.mark_dirty();
            }
            LayerOperation::Update { id, before, .. } => {
                if let Some(layer) = canvas.layer_mut(*id) {
                    before.apply_to(layer);
                    canvas.mark_dirty();
                }
            }
        }
    }

    fn redo(&self, canvas: &mut CanvasState) {
        match &self.op {
            LayerOperation::Add { index, layer, .. } => {
                let idx = (*index).min(canvas.layers.len());
                canvas.layers.insert(idx, layer.clone());
                canvas.active_layer_id = layer.id;
                canvas.mark_dirty();
            }
            LayerOperation::Delete { layer, .. } => {
                if let Some(idx) = canvas.layer_index(layer.id) {
                    // Mirror CanvasState::delete_layer's activation fallback.
                    canvas.layers.remove(idx);
                    if canvas.active_layer_id == layer.id && !canvas.layers.is_empty() {
                        let fallback = idx.saturating_sub(1).min(canvas.layers.len() - 1);
                        canvas.active_layer_id = canvas.layers[fallback].id;
                    }
                    canvas.mark_dirty();
                }
            }
            LayerOperation::Update { id, after, .. } => {
                if let Some(layer) = canvas.layer_mut(*id) {
                    after.apply_to(layer);
                    canvas.mark_dirty();
                }
            }
        }
    }

    fn description(&self) -> String {
        match &self.op {
            LayerOperation::Add { layer, .. } => format!("Add layer \"{}\"", layer.name),
            LayerOperation::Delete { layer, .. } => format!("Delete layer \"{}\"", layer.name),
            LayerOperation::Update { after, .. } => format!("Edit layer \"{}\"", after.name),
        }
    }

    fn memory_size(&self) -> usize {
        match &self.op {
            LayerOperation::Add { layer, .. } | LayerOperation::Delete { layer, .. } => {
                layer.pixels.memory_bytes() + std::mem::size_of::<Layer>()
            }
            LayerOperation::Update { .. } => std::mem::size_of::<LayerProps>() * 2,
        }
    }
}

// ============================================================================
// HISTORY MANAGER
// ============================================================================

/// Bounded undo/redo stacks. Pushing a new command clears the redo stack;
/// eviction drops the oldest undo entries past `max_steps` or past the
/// memory budget.
pub struct HistoryManager {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: Vec<Box<dyn Command>>,
    max_steps: usize,
    memory_budget: usize,
}

impl HistoryManager {
    pub fn new(max_steps: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_steps: max_steps.max(1),
            memory_budget: DEFAULT_MEMORY_BUDGET,
        }
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    pub fn push(&mut self, command: Box<dyn Command>) {
        self.redo_stack.clear();
        self.undo_stack.push_back(command);
        self.evict();
    }

    fn evict(&mut self) {
        while self.undo_stack.len() > self.max_steps {
            self.undo_stack.pop_front();
        }
        while self.undo_stack.len() > 1 && self.memory_used() > self.memory_budget {
            self.undo_stack.pop_front();
        }
    }

    pub fn undo(&mut self, canvas: &mut CanvasState) -> bool {
        match self.undo_stack.pop_back() {
            Some(command) => {
                command.undo(canvas);
                self.redo_stack.push(command);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self, canvas: &mut CanvasState) -> bool {
        match self.redo_stack.pop() {
            Some(command) => {
                command.redo(canvas);
                self.undo_stack.push_back(command);
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Description of the next command `undo` would run.
    pub fn next_undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    pub fn memory_used(&self) -> usize {
        self.undo_stack
            .iter()
            .chain(self.redo_stack.iter())
            .map(|c| c.memory_size())
            .sum()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::stroke::{PointerInput, StrokeEnd, StrokeEngine};
    use crate::tools::Tool;

    #[test]
    fn brush_command_round_trips() {
        let mut canvas = CanvasState::new(64, 64);
        let layer = canvas.add_layer("Ink");
        let mut engine = StrokeEngine::new();
        engine.select_tool(&mut canvas, Tool::Brush);
        engine.pointer_down(&mut canvas, PointerInput::new(10.0, 10.0));
        engine.pointer_move(&mut canvas, PointerInput::new(30.0, 10.0));
        let StrokeEnd::Painted(commit) = engine.pointer_up(&mut canvas) else {
            panic!("expected commit");
        };

        let mut history = HistoryManager::new(10);
        history.push(Box::new(BrushCommand::from_commit(
            &canvas,
            &commit,
            "Brush stroke",
        )));

        assert!(canvas.layer(layer).unwrap().pixels.get_pixel(10, 10)[3] > 0);
        assert!(history.undo(&mut canvas));
        assert_eq!(canvas.layer(layer).unwrap().pixels.get_pixel(10, 10)[3], 0);
        assert!(history.redo(&mut canvas));
        assert!(canvas.layer(layer).unwrap().pixels.get_pixel(10, 10)[3] > 0);
    }

    #[test]
    fn layer_delete_round_trips_with_activation() {
        let mut canvas = CanvasState::new(32, 32);
        let sketch = canvas.add_layer("Sketch");
        let idx = canvas.layer_index(sketch).unwrap();
        let snapshot = canvas.layer(sketch).unwrap().clone();
        canvas.delete_layer(sketch).unwrap();

        let mut history = HistoryManager::new(10);
        let cmd = LayerOpCommand::new(LayerOperation::Delete {
            index: idx,
            layer: snapshot,
            was_active: true,
        });
        history.push(Box::new(cmd));

        history.undo(&mut canvas);
        assert_eq!(canvas.layers.len(), 2);
        assert_eq!(canvas.active_layer_id, sketch);

        history.redo(&mut canvas);
        assert_eq!(canvas.layers.len(), 1);
        assert_ne!(canvas.active_layer_id, sketch);
    }

    #[test]
    fn push_clears_redo_and_caps_depth() {
        let mut canvas = CanvasState::new(16, 16);
        let layer = canvas.active_layer_id;
        let mut history = HistoryManager::new(2);
        let make = |canvas: &CanvasState| {
            Box::new(BrushCommand {
                description: "noop".into(),
                before: PixelPatch::capture(canvas, layer, (0, 0, 1, 1)),
                after: PixelPatch::capture(canvas, layer, (0, 0, 1, 1)),
            })
        };
        history.push(make(&canvas));
        history.push(make(&canvas));
        history.push(make(&canvas));
        assert_eq!(history.undo_depth(), 2); // oldest evicted

        history.undo(&mut canvas);
        assert!(history.can_redo());
        history.push(make(&canvas));
        assert!(!history.can_redo());
    }
}
