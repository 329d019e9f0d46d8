//! Stroke renderer: consumes pointer/touch events and stamps directly into
//! the active layer's buffer (immediate mode, never deferred).
//!
//! State machine per pointer interaction: `Idle -> Drawing -> Idle`.
//! Pointer-down enters Drawing only when drawing is enabled and the active
//! layer is unlocked. Every move extends the stroke and bumps the canvas
//! dirty generation so the display path re-composites. Pointer-up (or leave)
//! returns to Idle and yields the data history needs to undo the stroke.
//!
//! AI-flavored tools never paint; they accumulate a region of interest and
//! surface throttled region-edit requests for the AI bridge instead.

use std::time::{Duration, Instant};

use image::Rgba;

use crate::canvas::{CanvasState, LayerId, TiledImage};
use crate::ops::ai::Region;
use crate::tools::{config_for, BrushSettings, TipShape, Tool};

/// Default minimum interval between AI region requests fired from move events.
pub const AI_REQUEST_MIN_INTERVAL: Duration = Duration::from_millis(500);

// ============================================================================
// EVENTS AND RESULTS
// ============================================================================

/// A pointer sample in canvas coordinates. Touch input is translated 1:1 into
/// the same shape using the first touch point.
#[derive(Clone, Copy, Debug)]
pub struct PointerInput {
    pub x: f32,
    pub y: f32,
    /// Stylus pressure 0..=1; `None` for mouse/touch without pressure.
    pub pressure: Option<f32>,
}

impl PointerInput {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, pressure: None }
    }

    pub fn with_pressure(x: f32, y: f32, pressure: f32) -> Self {
        Self { x, y, pressure: Some(pressure) }
    }

    /// First-touch-point mapping for touch events.
    pub fn from_touches(touches: &[(f32, f32)]) -> Option<Self> {
        touches.first().map(|&(x, y)| Self::new(x, y))
    }
}

/// What a move event produced.
#[derive(Debug, PartialEq)]
pub enum MoveOutcome {
    /// Not in Drawing state; nothing happened.
    Ignored,
    /// Pixels were stamped into the active layer.
    Painted,
    /// AI tool: region accumulated, request throttled for now.
    AiAccumulated,
    /// AI tool: the throttle gate opened; fire this region at the bridge.
    AiRequestDue(Region),
}

/// Yielded when a paint stroke commits, carrying what history needs.
pub struct StrokeCommit {
    pub layer_id: LayerId,
    /// Clamped pixel bounds touched by the stroke: (x, y, w, h).
    pub bounds: (u32, u32, u32, u32),
    /// COW snapshot of the layer's pixels taken at pointer-down.
    pub before: TiledImage,
}

/// Yielded when an AI-tool stroke ends.
pub struct AiStrokeEnd {
    pub region: Region,
}

/// Result of `pointer_up` / `pointer_leave`.
pub enum StrokeEnd {
    /// Was Idle; nothing to commit.
    None,
    Painted(StrokeCommit),
    /// Stroke painted nothing visible (e.g. fully off-canvas).
    Empty,
    Ai(AiStrokeEnd),
}

// ============================================================================
// INTERNAL STROKE STATE
// ============================================================================

struct ActiveStroke {
    layer_id: LayerId,
    before: TiledImage,
    last: (f32, f32),
    smoothed: (f32, f32),
    /// Total distance traveled, drives the taper ramp-in.
    traveled: f32,
    /// Distance left over from the previous segment's stamp walk.
    residual: f32,
    bounds: Option<(f32, f32, f32, f32)>,
    last_dir: (f32, f32),
    erase: bool,
}

struct ActiveAiStroke {
    bounds: (f32, f32, f32, f32),
    last_request: Option<Instant>,
}

enum Phase {
    Idle,
    Drawing(ActiveStroke),
    AiDrawing(ActiveAiStroke),
}

// ============================================================================
// STROKE ENGINE
// ============================================================================

pub struct StrokeEngine {
    phase: Phase,
    /// Live brush parameters, reset from the catalog on tool switch.
    pub settings: BrushSettings,
    /// Master toggle; when false, pointer-down is ignored entirely.
    pub drawing_enabled: bool,
    pub ai_min_interval: Duration,
    stamp_counter: u32,
}

impl Default for StrokeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StrokeEngine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            settings: BrushSettings::default(),
            drawing_enabled: true,
            ai_min_interval: AI_REQUEST_MIN_INTERVAL,
            stamp_counter: 0,
        }
    }

    pub fn is_drawing(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    /// Switch tools: copies the catalog defaults into the live settings and
    /// propagates size/opacity into `CanvasState` so UI controls stay in
    /// sync. An in-flight stroke is abandoned.
    pub fn select_tool(&mut self, canvas: &mut CanvasState, tool: Tool) {
        let cfg = config_for(tool);
        self.settings = cfg.default_settings.clone();
        self.phase = Phase::Idle;
        canvas.tool = tool;
        canvas.brush_size = self.settings.size;
        canvas.brush_opacity = self.settings.opacity;
        canvas.mark_dirty();
    }

    /// Change the live brush size, clamped to the current tool's bounds, and
    /// mirror it into the canvas state.
    pub fn set_size(&mut self, canvas: &mut CanvasState, size: f32) {
        let clamped = config_for(canvas.tool).clamp_size(size);
        self.settings.size = clamped;
        canvas.brush_size = clamped;
    }

    pub fn set_opacity(&mut self, canvas: &mut CanvasState, opacity: u8) {
        let clamped = opacity.min(100);
        self.settings.opacity = clamped;
        canvas.brush_opacity = clamped;
    }

    // ---- pointer state machine ----------------------------------------------

    /// `Idle -> Drawing` transition. Returns false (and stays Idle) when
    /// drawing is disabled or the active layer is locked.
    pub fn pointer_down(&mut self, canvas: &mut CanvasState, input: PointerInput) -> bool {
        if !self.drawing_enabled || self.is_drawing() {
            return false;
        }
        if canvas.active_layer().locked {
            return false;
        }

        if canvas.tool.is_ai() {
            let r = self.settings.size / 2.0;
            self.phase = Phase::AiDrawing(ActiveAiStroke {
                bounds: (input.x - r, input.y - r, input.x + r, input.y + r),
                last_request: None,
            });
            return true;
        }

        let layer_id = canvas.active_layer_id;
        let before = canvas.active_layer().pixels.clone();
        let erase = canvas.tool.is_eraser();
        let mut stroke = ActiveStroke {
            layer_id,
            before,
            last: (input.x, input.y),
            smoothed: (input.x, input.y),
            traveled: 0.0,
            residual: 0.0,
            bounds: None,
            last_dir: (0.0, 0.0),
            erase,
        };
        // Start point is stamped immediately; a tap leaves a dot.
        self.stamp(canvas, &mut stroke, (input.x, input.y), input.pressure);
        canvas.mark_dirty();
        self.phase = Phase::Drawing(stroke);
        true
    }

    /// Extend the stroke. Paint tools stamp the interpolated segment
    /// immediately; AI tools grow the region and surface a request when the
    /// throttle gate opens.
    pub fn pointer_move(&mut self, canvas: &mut CanvasState, input: PointerInput) -> MoveOutcome {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => MoveOutcome::Ignored,
            Phase::AiDrawing(mut ai) => {
                let r = self.settings.size / 2.0;
                ai.bounds.0 = ai.bounds.0.min(input.x - r);
                ai.bounds.1 = ai.bounds.1.min(input.y - r);
                ai.bounds.2 = ai.bounds.2.max(input.x + r);
                ai.bounds.3 = ai.bounds.3.max(input.y + r);

                let due = match ai.last_request {
                    None => true,
                    Some(at) => at.elapsed() >= self.ai_min_interval,
                };
                let outcome = if due {
                    ai.last_request = Some(Instant::now());
                    MoveOutcome::AiRequestDue(clamp_region(ai.bounds, canvas.width, canvas.height))
                } else {
                    MoveOutcome::AiAccumulated
                };
                self.phase = Phase::AiDrawing(ai);
                outcome
            }
            Phase::Drawing(mut stroke) => {
                // Input smoothing: exponential follow toward the raw sample.
                let s = (self.settings.smoothing * 0.8).clamp(0.0, 0.95);
                let target = (input.x, input.y);
                stroke.smoothed = (
                    stroke.smoothed.0 * s + target.0 * (1.0 - s),
                    stroke.smoothed.1 * s + target.1 * (1.0 - s),
                );
                let from = stroke.last;
                let to = stroke.smoothed;
                self.stamp_segment(canvas, &mut stroke, from, to, input.pressure);
                stroke.last = to;
                canvas.mark_dirty();
                self.phase = Phase::Drawing(stroke);
                MoveOutcome::Painted
            }
        }
    }

    /// `Drawing -> Idle`. Closes the stroke, draws the taper-out tail if the
    /// tool tapers, and returns commit data for history.
    pub fn pointer_up(&mut self, canvas: &mut CanvasState) -> StrokeEnd {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => StrokeEnd::None,
            Phase::AiDrawing(ai) => StrokeEnd::Ai(AiStrokeEnd {
                region: clamp_region(ai.bounds, canvas.width, canvas.height),
            }),
            Phase::Drawing(mut stroke) => {
                let taper = self.settings.tapering;
                if !stroke.erase && taper.enabled && taper.end_taper > 0.0 {
                    self.stamp_taper_tail(canvas, &mut stroke);
                }
                canvas.mark_dirty();
                match stroke.bounds {
                    None => StrokeEnd::Empty,
                    Some(b) => {
                        canvas.has_drawing = true;
                        StrokeEnd::Painted(StrokeCommit {
                            layer_id: stroke.layer_id,
                            bounds: clamp_bounds(b, canvas.width, canvas.height),
                            before: stroke.before,
                        })
                    }
                }
            }
        }
    }

    /// Pointer leaving the canvas closes the stroke exactly like pointer-up.
    pub fn pointer_leave(&mut self, canvas: &mut CanvasState) -> StrokeEnd {
        self.pointer_up(canvas)
    }

    // ---- stamping -----------------------------------------------------------

    fn stamp_segment(
        &mut self,
        canvas: &mut CanvasState,
        stroke: &mut ActiveStroke,
        from: (f32, f32),
        to: (f32, f32),
        pressure: Option<f32>,
    ) {
        let dx = to.0 - from.0;
        let dy = to.1 - from.1;
        let distance = (dx * dx + dy * dy).sqrt();
        if distance < f32::EPSILON {
            return;
        }
        stroke.last_dir = (dx / distance, dy / distance);

        let step = (self.settings.size * self.settings.spacing).max(0.5);
        // Resume the stamp walk where the previous segment left off.
        let mut travel = step - stroke.residual;
        while travel <= distance {
            let t = travel / distance;
            let pos = (from.0 + dx * t, from.1 + dy * t);
            stroke.traveled += step;
            self.stamp(canvas, stroke, pos, pressure);
            travel += step;
        }
        stroke.residual = distance - (travel - step);
    }

    /// One stamp of the current tip at `pos`, written straight into the
    /// active layer's buffer.
    fn stamp(
        &mut self,
        canvas: &mut CanvasState,
        stroke: &mut ActiveStroke,
        pos: (f32, f32),
        pressure: Option<f32>,
    ) {
        self.stamp_counter = self.stamp_counter.wrapping_add(1);

        let mut radius = (self.settings.size / 2.0).max(0.25);
        if self.settings.pressure_sensitivity
            && let Some(p) = pressure
        {
            radius *= p.clamp(0.05, 1.0);
        }
        radius *= self.taper_in_factor(stroke.traveled);

        let (cx, cy) = self.scattered(pos);
        self.stamp_at(canvas, stroke, (cx, cy), radius, 1.0);
    }

    /// Taper ramp-in: stamp radius grows from a thin start over a window
    /// proportional to brush size and `start_taper`.
    fn taper_in_factor(&self, traveled: f32) -> f32 {
        let taper = self.settings.tapering;
        if !taper.enabled || taper.start_taper <= 0.0 {
            return 1.0;
        }
        let window = (self.settings.size * 8.0 * taper.start_taper).max(1.0);
        (0.15 + 0.85 * (traveled / window).min(1.0)).min(1.0)
    }

    /// Fade-out tail stamped past the release point along the last stroke
    /// direction, shrinking to nothing over a window scaled by `end_taper`.
    fn stamp_taper_tail(&mut self, canvas: &mut CanvasState, stroke: &mut ActiveStroke) {
        let (dx, dy) = stroke.last_dir;
        if dx == 0.0 && dy == 0.0 {
            return;
        }
        let taper = self.settings.tapering;
        let tail_len = self.settings.size * 4.0 * taper.end_taper;
        let steps = 6u32;
        let base_radius = (self.settings.size / 2.0).max(0.25);
        for i in 1..=steps {
            let t = i as f32 / steps as f32;
            let pos = (
                stroke.last.0 + dx * tail_len * t,
                stroke.last.1 + dy * tail_len * t,
            );
            let radius = base_radius * (1.0 - t);
            if radius < 0.1 {
                break;
            }
            self.stamp_at(canvas, stroke, pos, radius, 1.0 - t * 0.5);
        }
    }

    fn stamp_at(
        &mut self,
        canvas: &mut CanvasState,
        stroke: &mut ActiveStroke,
        (cx, cy): (f32, f32),
        radius: f32,
        alpha_scale: f32,
    ) {
        let color = canvas.color;
        let hardness = self.settings.hardness.clamp(0.0, 0.999);
        let flow = self.settings.flow_rate.clamp(0.0, 1.0);
        let opacity = self.settings.opacity as f32 / 100.0;
        let erase = stroke.erase;
        let chisel = self.settings.tip_shape == TipShape::Chisel;
        let (rot_sin, rot_cos) = self.settings.rotation.to_radians().sin_cos();

        let min_x = ((cx - radius).floor().max(0.0)) as u32;
        let min_y = ((cy - radius).floor().max(0.0)) as u32;
        let max_x = ((cx + radius).ceil() as i64).clamp(0, canvas.width as i64) as u32;
        let max_y = ((cy + radius).ceil() as i64).clamp(0, canvas.height as i64) as u32;
        if min_x >= max_x || min_y >= max_y {
            return;
        }

        let idx = match canvas.layer_index(stroke.layer_id) {
            Some(i) => i,
            None => return, // layer vanished mid-stroke
        };
        let pixels = &mut canvas.layers[idx].pixels;

        for y in min_y..max_y {
            for x in min_x..max_x {
                let mut dx = x as f32 + 0.5 - cx;
                let mut dy = y as f32 + 0.5 - cy;
                if chisel {
                    // Rotate into tip space and flatten the minor axis.
                    let rx = dx * rot_cos + dy * rot_sin;
                    let ry = -dx * rot_sin + dy * rot_cos;
                    dx = rx;
                    dy = ry / 0.4;
                }
                let d = (dx * dx + dy * dy).sqrt() / radius;
                if d > 1.0 {
                    continue;
                }
                // Hardness falloff: solid core, soft rim.
                let geom = if d <= hardness {
                    1.0
                } else {
                    1.0 - (d - hardness) / (1.0 - hardness)
                };
                let a = geom * flow * opacity * alpha_scale;
                if a <= 0.0 {
                    continue;
                }
                if erase {
                    pixels.erase_pixel(x, y, a);
                } else {
                    let src = Rgba([
                        color[0],
                        color[1],
                        color[2],
                        (a * color[3] as f32).round().clamp(0.0, 255.0) as u8,
                    ]);
                    let dst = *pixels.get_pixel(x, y);
                    pixels.put_pixel(
                        x,
                        y,
                        CanvasState::blend_pixel(dst, src, crate::canvas::BlendMode::Normal, 1.0),
                    );
                }
            }
        }

        let b = (cx - radius, cy - radius, cx + radius, cy + radius);
        stroke.bounds = Some(match stroke.bounds {
            None => b,
            Some(prev) => (
                prev.0.min(b.0),
                prev.1.min(b.1),
                prev.2.max(b.2),
                prev.3.max(b.3),
            ),
        });
    }

    /// Deterministic positional hash drives scattering, so strokes replay
    /// identically in tests.
    fn scattered(&self, (x, y): (f32, f32)) -> (f32, f32) {
        let scatter = self.settings.scattering;
        if scatter <= 0.0 {
            return (x, y);
        }
        let h = stamp_hash(x, y, self.stamp_counter);
        let amount = scatter * self.settings.size;
        let ox = ((h & 0xFFFF) as f32 / 65535.0 - 0.5) * amount;
        let oy = (((h >> 16) & 0xFFFF) as f32 / 65535.0 - 0.5) * amount;
        (x + ox, y + oy)
    }
}

/// Simple positional hash for pseudorandom per-stamp offsets.
fn stamp_hash(x: f32, y: f32, counter: u32) -> u32 {
    let ix = (x * 100.0) as u32;
    let iy = (y * 100.0) as u32;
    let mut h = ix
        .wrapping_mul(374_761_393)
        .wrapping_add(iy.wrapping_mul(668_265_263))
        .wrapping_add(counter.wrapping_mul(1_013_904_223));
    h ^= h >> 13;
    h = h.wrapping_mul(1_274_126_177);
    h ^= h >> 16;
    h
}

fn clamp_bounds(b: (f32, f32, f32, f32), w: u32, h: u32) -> (u32, u32, u32, u32) {
    let x0 = b.0.floor().max(0.0) as u32;
    let y0 = b.1.floor().max(0.0) as u32;
    let x1 = (b.2.ceil().max(0.0) as u32).min(w);
    let y1 = (b.3.ceil().max(0.0) as u32).min(h);
    (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
}

fn clamp_region(b: (f32, f32, f32, f32), w: u32, h: u32) -> Region {
    let (x, y, rw, rh) = clamp_bounds(b, w, h);
    Region {
        x,
        y,
        width: rw.max(1),
        height: rh.max(1),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::canvas::LayerPatch;

    fn canvas() -> CanvasState {
        CanvasState::new(128, 128)
    }

    #[test]
    fn idle_move_is_ignored() {
        let mut c = canvas();
        let mut engine = StrokeEngine::new();
        assert_eq!(
            engine.pointer_move(&mut c, PointerInput::new(10.0, 10.0)),
            MoveOutcome::Ignored
        );
    }

    #[test]
    fn locked_layer_rejects_pointer_down() {
        let mut c = canvas();
        let id = c.active_layer_id;
        c.update_layer(id, LayerPatch { locked: Some(true), ..Default::default() })
            .unwrap();
        let mut engine = StrokeEngine::new();
        assert!(!engine.pointer_down(&mut c, PointerInput::new(10.0, 10.0)));
        assert!(!engine.is_drawing());
    }

    #[test]
    fn disabled_drawing_rejects_pointer_down() {
        let mut c = canvas();
        let mut engine = StrokeEngine::new();
        engine.drawing_enabled = false;
        assert!(!engine.pointer_down(&mut c, PointerInput::new(10.0, 10.0)));
    }

    #[test]
    fn stroke_paints_and_commits() {
        let mut c = canvas();
        let layer = c.add_layer("Ink");
        let mut engine = StrokeEngine::new();
        engine.select_tool(&mut c, Tool::Brush);

        assert!(engine.pointer_down(&mut c, PointerInput::new(20.0, 20.0)));
        engine.pointer_move(&mut c, PointerInput::new(60.0, 20.0));
        let end = engine.pointer_up(&mut c);

        let commit = match end {
            StrokeEnd::Painted(commit) => commit,
            _ => panic!("expected painted commit"),
        };
        assert_eq!(commit.layer_id, layer);
        assert!(c.has_drawing);
        assert!(!engine.is_drawing());
        // The down-stamp lands at the start point.
        assert!(c.layer(layer).unwrap().pixels.get_pixel(20, 20)[3] > 0);
        // The pre-stroke snapshot is untouched.
        assert_eq!(commit.before.get_pixel(20, 20)[3], 0);
    }

    #[test]
    fn eraser_removes_paint() {
        let mut c = canvas();
        let layer = c.add_layer("Ink");
        for y in 0..40 {
            for x in 0..40 {
                c.layer_mut(layer)
                    .unwrap()
                    .pixels
                    .put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        let mut engine = StrokeEngine::new();
        engine.select_tool(&mut c, Tool::Eraser);
        engine.pointer_down(&mut c, PointerInput::new(20.0, 20.0));
        engine.pointer_up(&mut c);
        assert!(c.layer(layer).unwrap().pixels.get_pixel(20, 20)[3] < 255);
    }

    #[test]
    fn ai_tool_accumulates_region_without_painting() {
        let mut c = canvas();
        let layer = c.add_layer("Sketch");
        let mut engine = StrokeEngine::new();
        engine.select_tool(&mut c, Tool::SmartBrush);

        assert!(engine.pointer_down(&mut c, PointerInput::new(30.0, 30.0)));
        // First move fires immediately, the second is throttled.
        let first = engine.pointer_move(&mut c, PointerInput::new(40.0, 40.0));
        assert!(matches!(first, MoveOutcome::AiRequestDue(_)));
        let second = engine.pointer_move(&mut c, PointerInput::new(50.0, 50.0));
        assert_eq!(second, MoveOutcome::AiAccumulated);

        let end = engine.pointer_up(&mut c);
        let region = match end {
            StrokeEnd::Ai(ai) => ai.region,
            _ => panic!("expected AI stroke end"),
        };
        assert!(region.width > 0 && region.height > 0);
        // Nothing was painted.
        assert!(c.layer(layer).unwrap().pixels.is_empty());
        assert!(!c.has_drawing);
    }

    #[test]
    fn select_tool_copies_preset_and_propagates() {
        let mut c = canvas();
        let mut engine = StrokeEngine::new();
        engine.select_tool(&mut c, Tool::FineLiner);
        assert_eq!(engine.settings.size, 0.5);
        assert!(engine.settings.tapering.enabled);
        assert_eq!(c.tool, Tool::FineLiner);
        assert_eq!(c.brush_size, 0.5);
        assert_eq!(c.brush_opacity, 100);
    }

    #[test]
    fn touch_maps_first_point() {
        let input = PointerInput::from_touches(&[(5.0, 6.0), (50.0, 60.0)]).unwrap();
        assert_eq!((input.x, input.y), (5.0, 6.0));
        assert!(PointerInput::from_touches(&[]).is_none());
    }

    #[test]
    fn set_size_clamps_to_pen_bounds() {
        let mut c = canvas();
        let mut engine = StrokeEngine::new();
        engine.select_tool(&mut c, Tool::FineLiner);
        engine.set_size(&mut c, 99.0);
        assert_eq!(engine.settings.size, config_for(Tool::FineLiner).max_size);
        assert_eq!(c.brush_size, engine.settings.size);
    }
}
