use std::sync::Arc;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use uuid::Uuid;

use crate::log_warn;
use crate::tools::Tool;

/// Maximum longest-edge dimension for version thumbnails.
const THUMB_MAX_EDGE: u32 = 256;

// ============================================================================
// TILED IMAGE - sparse 64×64 chunk storage (Vec-indexed for speed)
// ============================================================================

pub const CHUNK_SIZE: u32 = 64;

/// A pixel with zero alpha, returned by reference for missing chunks.
static TRANSPARENT_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Sparse tiled image backed by a flat `Vec<Option<Arc<RgbaImage>>>`.
/// Chunk coordinates map to a flat index via `cy * chunks_per_row + cx`,
/// giving O(1) access with zero hashing overhead.
///
/// Chunks are wrapped in `Arc` for copy-on-write semantics: `clone()` only
/// bumps reference counts, so history patches and version snapshots can hold
/// cheap pre-stroke copies. Mutations use `Arc::make_mut` to COW-clone only
/// the touched chunk.
#[derive(Clone)]
pub struct TiledImage {
    width: u32,
    height: u32,
    chunks_per_row: u32,
    chunks: Vec<Option<Arc<RgbaImage>>>,
}

impl TiledImage {
    /// Create an empty (fully transparent) tiled image.
    pub fn new(width: u32, height: u32) -> Self {
        // Clamp dimensions to prevent overflow (max ~256 megapixels)
        let (width, height) = {
            let total = (width as u64) * (height as u64);
            if total > 256_000_000 || width == 0 || height == 0 {
                log_warn!(
                    "TiledImage::new: dimensions {}x{} out of range, clamped to 1x1",
                    width,
                    height
                );
                (1, 1)
            } else {
                (width, height)
            }
        };
        let chunks_per_row = width.div_ceil(CHUNK_SIZE);
        let chunks_per_col = height.div_ceil(CHUNK_SIZE);
        let total = (chunks_per_row * chunks_per_col) as usize;
        Self {
            width,
            height,
            chunks_per_row,
            chunks: vec![None; total],
        }
    }

    /// Fill the entire image with `color`. A transparent fill costs nothing
    /// because missing chunks already read as transparent.
    pub fn new_filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        let mut img = Self::new(width, height);
        if color[3] > 0 {
            let chunk = Arc::new(RgbaImage::from_pixel(CHUNK_SIZE, CHUNK_SIZE, color));
            for slot in &mut img.chunks {
                *slot = Some(Arc::clone(&chunk));
            }
        }
        img
    }

    /// Import from a flat `RgbaImage`. Only non-transparent chunks are stored.
    /// Chunk conversion is parallelised with rayon for faster import of large
    /// images (AI results, decoded snapshots).
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let width = src.width();
        let height = src.height();
        let mut img = Self::new(width, height);
        if img.width != width || img.height != height {
            // Source exceeded the dimension clamp; nothing sensible to import.
            return img;
        }

        let chunks_x = img.chunks_per_row as usize;
        let total_chunks = img.chunks.len();
        let src_raw = src.as_raw();

        let chunk_results: Vec<(usize, Option<Arc<RgbaImage>>)> = (0..total_chunks)
            .into_par_iter()
            .map(|flat| {
                let cx = (flat % chunks_x) as u32;
                let cy = (flat / chunks_x) as u32;
                let base_x = cx * CHUNK_SIZE;
                let base_y = cy * CHUNK_SIZE;

                let cw = CHUNK_SIZE.min(width - base_x);
                let ch = CHUNK_SIZE.min(height - base_y);
                let chunk_stride = CHUNK_SIZE as usize * 4;
                let mut chunk_data = vec![0u8; chunk_stride * CHUNK_SIZE as usize];
                let mut has_content = false;

                for ly in 0..ch {
                    let src_start = ((base_y + ly) * width + base_x) as usize * 4;
                    let dst_start = ly as usize * chunk_stride;
                    let byte_len = cw as usize * 4;
                    chunk_data[dst_start..dst_start + byte_len]
                        .copy_from_slice(&src_raw[src_start..src_start + byte_len]);

                    if !has_content {
                        for lx in 0..cw as usize {
                            if chunk_data[dst_start + lx * 4 + 3] != 0 {
                                has_content = true;
                                break;
                            }
                        }
                    }
                }

                if has_content {
                    let chunk = RgbaImage::from_raw(CHUNK_SIZE, CHUNK_SIZE, chunk_data)
                        .expect("chunk buffer has exact size");
                    (flat, Some(Arc::new(chunk)))
                } else {
                    (flat, None)
                }
            })
            .collect();

        for (idx, chunk) in chunk_results {
            img.chunks[idx] = chunk;
        }
        img
    }

    /// Flatten back to a contiguous `RgbaImage`.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        let out_raw = out.as_mut();
        let out_stride = self.width as usize * 4;
        for (cx, cy) in self.chunk_keys() {
            if let Some(chunk) = self.get_chunk(cx, cy) {
                let base_x = cx * CHUNK_SIZE;
                let base_y = cy * CHUNK_SIZE;
                let cw = (CHUNK_SIZE.min(self.width.saturating_sub(base_x))) as usize;
                let ch = CHUNK_SIZE.min(self.height.saturating_sub(base_y));
                let chunk_raw = chunk.as_raw();
                let chunk_stride = CHUNK_SIZE as usize * 4;
                for ly in 0..ch as usize {
                    let src_start = ly * chunk_stride;
                    let src_end = src_start + cw * 4;
                    let dst_start = (base_y as usize + ly) * out_stride + base_x as usize * 4;
                    out_raw[dst_start..dst_start + cw * 4]
                        .copy_from_slice(&chunk_raw[src_start..src_end]);
                }
            }
        }
        out
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn chunk_index(&self, cx: u32, cy: u32) -> usize {
        (cy * self.chunks_per_row + cx) as usize
    }

    /// Chunk for (cx, cy), or `None` if that region is fully transparent or
    /// outside this image's chunk grid.
    pub fn get_chunk(&self, cx: u32, cy: u32) -> Option<&Arc<RgbaImage>> {
        if cx >= self.chunks_per_row {
            return None;
        }
        self.chunks.get(self.chunk_index(cx, cy))?.as_ref()
    }

    /// Iterate coordinates of populated chunks.
    pub fn chunk_keys(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let cpr = self.chunks_per_row;
        self.chunks.iter().enumerate().filter_map(move |(i, c)| {
            c.as_ref()
                .map(|_| ((i as u32) % cpr, (i as u32) / cpr))
        })
    }

    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> &Rgba<u8> {
        if x >= self.width || y >= self.height {
            return &TRANSPARENT_PIXEL;
        }
        match self.get_chunk(x / CHUNK_SIZE, y / CHUNK_SIZE) {
            Some(chunk) => chunk.get_pixel(x % CHUNK_SIZE, y % CHUNK_SIZE),
            None => &TRANSPARENT_PIXEL,
        }
    }

    /// Write one pixel, COW-cloning only the touched chunk. Out-of-bounds
    /// writes are ignored.
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: Rgba<u8>) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = self.chunk_index(x / CHUNK_SIZE, y / CHUNK_SIZE);
        let slot = &mut self.chunks[idx];
        if slot.is_none() {
            if pixel[3] == 0 {
                return; // transparent write into an empty chunk is a no-op
            }
            *slot = Some(Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
        }
        let chunk = Arc::make_mut(slot.as_mut().expect("slot populated above"));
        chunk.put_pixel(x % CHUNK_SIZE, y % CHUNK_SIZE, pixel);
    }

    /// Multiply a pixel's alpha by `1 - strength` (the eraser's destructive
    /// composite). `strength` is clamped to 0..=1.
    pub fn erase_pixel(&mut self, x: u32, y: u32, strength: f32) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = self.chunk_index(x / CHUNK_SIZE, y / CHUNK_SIZE);
        let Some(slot) = self.chunks[idx].as_mut() else {
            return; // nothing here to erase
        };
        let chunk = Arc::make_mut(slot);
        let px = chunk.get_pixel_mut(x % CHUNK_SIZE, y % CHUNK_SIZE);
        let keep = 1.0 - strength.clamp(0.0, 1.0);
        px[3] = (px[3] as f32 * keep).round() as u8;
    }

    /// True when no chunk holds any pixels.
    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|c| c.is_none())
    }

    /// Approximate unique pixel memory owned by this image. Chunks shared
    /// with snapshots count only their pointer overhead.
    pub fn memory_bytes(&self) -> usize {
        let chunk_byte_size = (CHUNK_SIZE * CHUNK_SIZE * 4) as usize;
        self.chunks
            .iter()
            .filter_map(|c| c.as_ref())
            .map(|arc| {
                if Arc::strong_count(arc) == 1 {
                    chunk_byte_size
                } else {
                    std::mem::size_of::<usize>() * 2
                }
            })
            .sum()
    }
}

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
        }
    }

    /// Stable string id used in the project JSON format.
    pub fn id(&self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
        }
    }

    /// Reconstruct from a string id (defaults to Normal for unknown values,
    /// matching the forgiving decode used everywhere else in the format).
    pub fn from_id(id: &str) -> Self {
        match id {
            "multiply" => BlendMode::Multiply,
            "screen" => BlendMode::Screen,
            "overlay" => BlendMode::Overlay,
            "darken" => BlendMode::Darken,
            "lighten" => BlendMode::Lighten,
            _ => BlendMode::Normal,
        }
    }
}

// ============================================================================
// LAYERS
// ============================================================================

/// Stable identity of a layer, independent of its stack position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        LayerId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for LayerId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(LayerId(Uuid::parse_str(s)?))
    }
}

/// One paintable surface in the stack. The pixel buffer is owned exclusively
/// by the layer and lives exactly as long as it does. Cloning is cheap
/// thanks to the chunk-level COW buffer; history and snapshots rely on that.
#[derive(Clone)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    /// Percent, 0..=100. The compositor blends with alpha `opacity / 100`.
    pub opacity: u8,
    pub blend_mode: BlendMode,
    /// Locked layers reject strokes; the stroke engine never enters Drawing
    /// on them.
    pub locked: bool,
    pub pixels: TiledImage,
}

impl Layer {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: LayerId::new(),
            name: name.into(),
            visible: true,
            opacity: 100,
            blend_mode: BlendMode::Normal,
            locked: false,
            pixels: TiledImage::new(width, height),
        }
    }

    pub fn new_filled(name: impl Into<String>, width: u32, height: u32, fill: Rgba<u8>) -> Self {
        let mut layer = Self::new(name, width, height);
        layer.pixels = TiledImage::new_filled(width, height, fill);
        layer
    }
}

/// Partial update for `CanvasState::update_layer`. `None` fields are left
/// untouched.
#[derive(Default, Clone, Debug)]
pub struct LayerPatch {
    pub name: Option<String>,
    pub visible: Option<bool>,
    pub opacity: Option<u8>,
    pub blend_mode: Option<BlendMode>,
    pub locked: Option<bool>,
}

// ============================================================================
// ERRORS
// ============================================================================

/// Validation failures for layer-store operations. These reject locally with
/// no state change; nothing here is ever fatal.
#[derive(Debug, PartialEq, Eq)]
pub enum CanvasError {
    /// Deleting the sole remaining layer violates the "at least one layer"
    /// invariant.
    LastLayer,
    UnknownLayer(LayerId),
}

impl std::fmt::Display for CanvasError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CanvasError::LastLayer => write!(f, "Cannot delete the only remaining layer"),
            CanvasError::UnknownLayer(id) => write!(f, "No layer with id {}", id),
        }
    }
}

impl std::error::Error for CanvasError {}

// ============================================================================
// CANVAS STATE - the single mutable view-model behind compositor and strokes
// ============================================================================

pub struct CanvasState {
    pub width: u32,
    pub height: u32,
    /// Stack order: index 0 is the bottom layer.
    pub layers: Vec<Layer>,
    pub active_layer_id: LayerId,
    /// View transform. The compositor ignores these; they exist so a display
    /// surface can restore the user's viewport from a saved project.
    pub zoom: f32,
    pub position: (f32, f32),
    pub tool: Tool,
    /// Current paint color, RGBA.
    pub color: Rgba<u8>,
    /// Live brush size/opacity, kept in sync with the selected tool's
    /// settings so UI controls stay consistent.
    pub brush_size: f32,
    pub brush_opacity: u8,
    pub blend_mode: BlendMode,
    /// Set once any stroke has been committed to a layer.
    pub has_drawing: bool,
    /// Optional loaded outline image, drawn below the layer stack scaled to
    /// the canvas's logical size.
    pub outline: Option<RgbaImage>,
    /// Monotonically increasing counter, bumped on each mutation. The display
    /// path re-composites whenever it observes a new value, which makes the
    /// visible canvas eventually consistent with the latest mutation.
    pub dirty_generation: u64,
}

impl CanvasState {
    pub fn new(width: u32, height: u32) -> Self {
        let background =
            Layer::new_filled("Background", width, height, Rgba([255, 255, 255, 255]));
        let active = background.id;
        Self {
            width,
            height,
            layers: vec![background],
            active_layer_id: active,
            zoom: 1.0,
            position: (0.0, 0.0),
            tool: Tool::default(),
            color: Rgba([0, 0, 0, 255]),
            brush_size: 8.0,
            brush_opacity: 100,
            blend_mode: BlendMode::Normal,
            has_drawing: false,
            outline: None,
            dirty_generation: 0,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty_generation = self.dirty_generation.wrapping_add(1);
    }

    // ---- layer store --------------------------------------------------------

    pub fn layer_index(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn active_layer(&self) -> &Layer {
        self.layer(self.active_layer_id)
            .unwrap_or(&self.layers[0])
    }

    pub fn active_layer_mut(&mut self) -> &mut Layer {
        let id = self.active_layer_id;
        let idx = self.layer_index(id).unwrap_or(0);
        &mut self.layers[idx]
    }

    /// Append a new transparent layer on top of the stack. The new layer
    /// becomes the active one.
    pub fn add_layer(&mut self, name: impl Into<String>) -> LayerId {
        let layer = Layer::new(name, self.width, self.height);
        let id = layer.id;
        self.layers.push(layer);
        self.active_layer_id = id;
        self.mark_dirty();
        id
    }

    /// Apply a partial update to a layer's metadata. Opacity is clamped to
    /// 0..=100.
    pub fn update_layer(&mut self, id: LayerId, patch: LayerPatch) -> Result<(), CanvasError> {
        let layer = self.layer_mut(id).ok_or(CanvasError::UnknownLayer(id))?;
        if let Some(name) = patch.name {
            layer.name = name;
        }
        if let Some(visible) = patch.visible {
            layer.visible = visible;
        }
        if let Some(opacity) = patch.opacity {
            layer.opacity = opacity.min(100);
        }
        if let Some(mode) = patch.blend_mode {
            layer.blend_mode = mode;
        }
        if let Some(locked) = patch.locked {
            layer.locked = locked;
        }
        self.mark_dirty();
        Ok(())
    }

    /// Remove a layer. Rejected with `CanvasError::LastLayer` when it is the
    /// only one left; the layer list is unchanged on any error. When the
    /// active layer is deleted, activation moves to the layer below it (or
    /// the new bottom).
    pub fn delete_layer(&mut self, id: LayerId) -> Result<(), CanvasError> {
        if self.layers.len() == 1 {
            return Err(CanvasError::LastLayer);
        }
        let idx = self.layer_index(id).ok_or(CanvasError::UnknownLayer(id))?;
        self.layers.remove(idx);
        if self.active_layer_id == id {
            let fallback = idx.saturating_sub(1).min(self.layers.len() - 1);
            self.active_layer_id = self.layers[fallback].id;
        }
        self.mark_dirty();
        Ok(())
    }

    pub fn set_active_layer(&mut self, id: LayerId) -> Result<(), CanvasError> {
        if self.layer_index(id).is_none() {
            return Err(CanvasError::UnknownLayer(id));
        }
        self.active_layer_id = id;
        self.mark_dirty();
        Ok(())
    }

    // ---- outline ------------------------------------------------------------

    /// Install a generated outline image. It is drawn below the layer stack,
    /// scaled to the canvas's logical size at composite time.
    pub fn set_outline(&mut self, image: RgbaImage) {
        self.outline = Some(image);
        self.mark_dirty();
    }

    pub fn clear_outline(&mut self) {
        self.outline = None;
        self.mark_dirty();
    }

    // ---- compositor ---------------------------------------------------------

    /// Merge the outline and all visible layers, bottom-to-top, into a flat
    /// image. Each layer blends with alpha `opacity / 100` under its blend
    /// mode. Later (higher) layers paint over earlier ones.
    ///
    /// A degenerate canvas (zero logical size after clamping) composites to
    /// an empty image rather than panicking.
    pub fn composite(&self) -> RgbaImage {
        let mut result = match &self.outline {
            Some(outline) if outline.width() == self.width && outline.height() == self.height => {
                outline.clone()
            }
            Some(outline) => image::imageops::resize(
                outline,
                self.width.max(1),
                self.height.max(1),
                image::imageops::FilterType::Triangle,
            ),
            None => RgbaImage::new(self.width, self.height),
        };
        if self.width == 0 || self.height == 0 {
            return result;
        }

        // Collect unique chunk keys from visible layers; everywhere else the
        // output is already correct (outline or transparent).
        let mut active_chunks: Vec<(u32, u32)> = Vec::new();
        for layer in &self.layers {
            if !layer.visible || layer.opacity == 0 {
                continue;
            }
            active_chunks.extend(layer.pixels.chunk_keys());
        }
        active_chunks.sort_unstable();
        active_chunks.dedup();

        let layers = &self.layers;
        let img_w = self.width;
        let img_h = self.height;
        let base_image = &result;

        // Process chunks in parallel, seeding each from the outline pixels.
        let chunk_results: Vec<_> = active_chunks
            .par_iter()
            .map(|&(cx, cy)| {
                let base_x = cx * CHUNK_SIZE;
                let base_y = cy * CHUNK_SIZE;
                let cw = CHUNK_SIZE.min(img_w.saturating_sub(base_x));
                let ch = CHUNK_SIZE.min(img_h.saturating_sub(base_y));

                let mut pixels = vec![Rgba([0u8, 0, 0, 0]); (cw * ch) as usize];
                for ly in 0..ch {
                    for lx in 0..cw {
                        pixels[(ly * cw + lx) as usize] =
                            *base_image.get_pixel(base_x + lx, base_y + ly);
                    }
                }

                for layer in layers.iter() {
                    if !layer.visible || layer.opacity == 0 {
                        continue;
                    }
                    let Some(chunk) = layer.pixels.get_chunk(cx, cy) else {
                        continue;
                    };
                    let layer_alpha = layer.opacity as f32 / 100.0;
                    for ly in 0..ch {
                        for lx in 0..cw {
                            let idx = (ly * cw + lx) as usize;
                            let top = *chunk.get_pixel(lx, ly);
                            pixels[idx] =
                                Self::blend_pixel(pixels[idx], top, layer.blend_mode, layer_alpha);
                        }
                    }
                }

                (cx, cy, cw, ch, pixels)
            })
            .collect();

        for (cx, cy, cw, ch, pixels) in chunk_results {
            let base_x = cx * CHUNK_SIZE;
            let base_y = cy * CHUNK_SIZE;
            for ly in 0..ch {
                for lx in 0..cw {
                    result.put_pixel(base_x + lx, base_y + ly, pixels[(ly * cw + lx) as usize]);
                }
            }
        }

        result
    }

    /// Downscaled composite for snapshot thumbnails (max 256px longest edge).
    pub fn thumbnail(&self) -> RgbaImage {
        let full = self.composite();
        let (w, h) = (full.width(), full.height());
        let longest = w.max(h);
        if longest <= THUMB_MAX_EDGE {
            return full;
        }
        let scale = THUMB_MAX_EDGE as f32 / longest as f32;
        let nw = ((w as f32 * scale).round() as u32).max(1);
        let nh = ((h as f32 * scale).round() as u32).max(1);
        image::imageops::resize(&full, nw, nh, image::imageops::FilterType::Triangle)
    }

    /// Alpha-composite `top` over `base` under `mode`, with `opacity` in
    /// 0..=1 scaling the top pixel's alpha.
    pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
        // Fast path: fully transparent top pixel, nothing to blend
        if top[3] == 0 {
            return base;
        }

        // Fast path: Normal blend, full opacity, fully opaque top pixel
        if matches!(mode, BlendMode::Normal) && opacity >= 1.0 && top[3] == 255 {
            return top;
        }

        let opacity = opacity.clamp(0.0, 1.0);

        let base_r = base[0] as f32 / 255.0;
        let base_g = base[1] as f32 / 255.0;
        let base_b = base[2] as f32 / 255.0;
        let base_a = base[3] as f32 / 255.0;

        let top_r = top[0] as f32 / 255.0;
        let top_g = top[1] as f32 / 255.0;
        let top_b = top[2] as f32 / 255.0;
        let top_a = (top[3] as f32 / 255.0) * opacity;

        let (r, g, b) = match mode {
            BlendMode::Normal => (top_r, top_g, top_b),
            BlendMode::Multiply => (base_r * top_r, base_g * top_g, base_b * top_b),
            BlendMode::Screen => (
                1.0 - (1.0 - base_r) * (1.0 - top_r),
                1.0 - (1.0 - base_g) * (1.0 - top_g),
                1.0 - (1.0 - base_b) * (1.0 - top_b),
            ),
            BlendMode::Overlay => (
                Self::overlay_channel(base_r, top_r),
                Self::overlay_channel(base_g, top_g),
                Self::overlay_channel(base_b, top_b),
            ),
            BlendMode::Darken => (base_r.min(top_r), base_g.min(top_g), base_b.min(top_b)),
            BlendMode::Lighten => (base_r.max(top_r), base_g.max(top_g), base_b.max(top_b)),
        };

        let out_a = top_a + base_a * (1.0 - top_a);
        if out_a == 0.0 {
            return Rgba([0, 0, 0, 0]);
        }

        let out_r = (r * top_a + base_r * base_a * (1.0 - top_a)) / out_a;
        let out_g = (g * top_a + base_g * base_a * (1.0 - top_a)) / out_a;
        let out_b = (b * top_a + base_b * base_a * (1.0 - top_a)) / out_a;

        Rgba([
            (out_r * 255.0).clamp(0.0, 255.0) as u8,
            (out_g * 255.0).clamp(0.0, 255.0) as u8,
            (out_b * 255.0).clamp(0.0, 255.0) as u8,
            (out_a * 255.0).clamp(0.0, 255.0) as u8,
        ])
    }

    fn overlay_channel(base: f32, top: f32) -> f32 {
        if base < 0.5 {
            2.0 * base * top
        } else {
            1.0 - 2.0 * (1.0 - base) * (1.0 - top)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod test {
    use super::*;

    fn paint_rect(layer: &mut Layer, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgba<u8>) {
        for y in y0..y1 {
            for x in x0..x1 {
                layer.pixels.put_pixel(x, y, color);
            }
        }
    }

    #[test]
    fn deleting_sole_layer_is_rejected() {
        let mut canvas = CanvasState::new(64, 64);
        let only = canvas.layers[0].id;
        assert_eq!(canvas.delete_layer(only), Err(CanvasError::LastLayer));
        assert_eq!(canvas.layers.len(), 1);
        assert_eq!(canvas.layers[0].id, only);
    }

    #[test]
    fn deleting_active_layer_moves_activation_down() {
        let mut canvas = CanvasState::new(64, 64);
        let sketch = canvas.add_layer("Sketch");
        let ink = canvas.add_layer("Ink");
        assert_eq!(canvas.active_layer_id, ink);
        canvas.delete_layer(ink).unwrap();
        assert_eq!(canvas.active_layer_id, sketch);
    }

    #[test]
    fn invisible_layers_contribute_nothing() {
        let mut canvas = CanvasState::new(64, 64);
        let sketch = canvas.add_layer("Sketch");
        paint_rect(
            canvas.layer_mut(sketch).unwrap(),
            0,
            0,
            32,
            32,
            Rgba([255, 0, 0, 255]),
        );

        let with_hidden = {
            canvas
                .update_layer(sketch, LayerPatch { visible: Some(false), ..Default::default() })
                .unwrap();
            canvas.composite()
        };
        canvas.delete_layer(sketch).unwrap();
        let without = canvas.composite();
        assert_eq!(with_hidden.as_raw(), without.as_raw());
    }

    #[test]
    fn composite_is_invariant_under_reordering_invisible_layers() {
        let mut canvas = CanvasState::new(64, 64);
        let a = canvas.add_layer("Hidden A");
        paint_rect(canvas.layer_mut(a).unwrap(), 0, 0, 16, 16, Rgba([255, 0, 0, 255]));
        let b = canvas.add_layer("Hidden B");
        paint_rect(canvas.layer_mut(b).unwrap(), 8, 8, 24, 24, Rgba([0, 255, 0, 255]));
        for id in [a, b] {
            canvas
                .update_layer(id, LayerPatch { visible: Some(false), ..Default::default() })
                .unwrap();
        }
        let before = canvas.composite();
        canvas.layers.swap(1, 2);
        let after = canvas.composite();
        assert_eq!(before.as_raw(), after.as_raw());
    }

    #[test]
    fn zero_opacity_layer_contributes_nothing() {
        let mut canvas = CanvasState::new(64, 64);
        let baseline = canvas.composite();
        let sketch = canvas.add_layer("Sketch");
        paint_rect(
            canvas.layer_mut(sketch).unwrap(),
            0,
            0,
            64,
            64,
            Rgba([0, 255, 0, 255]),
        );
        canvas
            .update_layer(sketch, LayerPatch { opacity: Some(0), ..Default::default() })
            .unwrap();
        assert_eq!(canvas.composite().as_raw(), baseline.as_raw());
    }

    #[test]
    fn opacity_blends_as_fraction_of_100() {
        // Black at opacity 50 over a white background lands mid-gray.
        let base = Rgba([255, 255, 255, 255]);
        let top = Rgba([0, 0, 0, 255]);
        let out = CanvasState::blend_pixel(base, top, BlendMode::Normal, 50.0 / 100.0);
        assert_eq!(out[3], 255);
        assert!((out[0] as i32 - 128).abs() <= 1, "got {}", out[0]);
    }

    #[test]
    fn stack_order_is_significant() {
        let mut canvas = CanvasState::new(8, 8);
        let red = canvas.add_layer("Red");
        paint_rect(canvas.layer_mut(red).unwrap(), 0, 0, 8, 8, Rgba([255, 0, 0, 255]));
        let blue = canvas.add_layer("Blue");
        paint_rect(canvas.layer_mut(blue).unwrap(), 0, 0, 8, 8, Rgba([0, 0, 255, 255]));
        // Blue sits above red, so blue wins.
        assert_eq!(*canvas.composite().get_pixel(4, 4), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn multiply_layer_at_half_opacity_differs_from_hidden() {
        // Spec scenario: Background + "Sketch" at opacity 50, multiply.
        let mut canvas = CanvasState::new(64, 64);
        let sketch = canvas.add_layer("Sketch");
        paint_rect(
            canvas.layer_mut(sketch).unwrap(),
            8,
            8,
            40,
            40,
            Rgba([40, 40, 40, 255]),
        );
        canvas
            .update_layer(
                sketch,
                LayerPatch {
                    opacity: Some(50),
                    blend_mode: Some(BlendMode::Multiply),
                    ..Default::default()
                },
            )
            .unwrap();
        let shown = canvas.composite();
        canvas
            .update_layer(sketch, LayerPatch { visible: Some(false), ..Default::default() })
            .unwrap();
        let hidden = canvas.composite();
        assert_ne!(shown.as_raw(), hidden.as_raw());
    }

    #[test]
    fn outline_draws_below_the_stack() {
        let mut canvas = CanvasState::new(64, 64);
        let outline = RgbaImage::from_pixel(64, 64, Rgba([10, 20, 30, 255]));
        canvas.set_outline(outline);
        // Hide the white background so the outline shows through.
        let bg = canvas.layers[0].id;
        canvas
            .update_layer(bg, LayerPatch { visible: Some(false), ..Default::default() })
            .unwrap();
        let out = canvas.composite();
        assert_eq!(*out.get_pixel(32, 32), Rgba([10, 20, 30, 255]));

        // With the opaque background shown again, the outline is covered.
        canvas
            .update_layer(bg, LayerPatch { visible: Some(true), ..Default::default() })
            .unwrap();
        assert_eq!(*canvas.composite().get_pixel(32, 32), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn mismatched_outline_is_scaled_to_canvas_size() {
        let mut canvas = CanvasState::new(64, 64);
        canvas.set_outline(RgbaImage::from_pixel(32, 32, Rgba([0, 0, 0, 255])));
        assert_eq!(canvas.composite().dimensions(), (64, 64));
    }

    #[test]
    fn tiled_image_cow_clone_is_independent() {
        let mut a = TiledImage::new(64, 64);
        a.put_pixel(3, 3, Rgba([1, 2, 3, 255]));
        let b = a.clone();
        a.put_pixel(3, 3, Rgba([9, 9, 9, 255]));
        assert_eq!(*b.get_pixel(3, 3), Rgba([1, 2, 3, 255]));
        assert_eq!(*a.get_pixel(3, 3), Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn erase_pixel_reduces_alpha() {
        let mut img = TiledImage::new(16, 16);
        img.put_pixel(5, 5, Rgba([10, 10, 10, 200]));
        img.erase_pixel(5, 5, 0.5);
        assert_eq!(img.get_pixel(5, 5)[3], 100);
        img.erase_pixel(5, 5, 1.0);
        assert_eq!(img.get_pixel(5, 5)[3], 0);
    }
}
