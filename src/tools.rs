//! Drawing tools and the pen configuration catalog.
//!
//! Tools are a closed enum rather than free-form string ids; the string form
//! survives only at the serialization boundary (`Tool::id` / `Tool::from_id`)
//! so unknown ids from old files degrade to the basic brush instead of
//! failing.

// ============================================================================
// TOOLS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Tool {
    /// General-purpose round paint brush.
    #[default]
    Brush,
    Pencil,
    FineLiner,
    GPen,
    Marker,
    Airbrush,
    Eraser,
    /// AI-assisted: refines the stroked region through the remote service.
    SmartBrush,
    /// AI-assisted: regenerates the stroked region from scratch.
    AiDraw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolCategory {
    Sketch,
    Ink,
    Paint,
    Erase,
    Ai,
}

impl Tool {
    pub fn all() -> &'static [Tool] {
        &[
            Tool::Brush,
            Tool::Pencil,
            Tool::FineLiner,
            Tool::GPen,
            Tool::Marker,
            Tool::Airbrush,
            Tool::Eraser,
            Tool::SmartBrush,
            Tool::AiDraw,
        ]
    }

    /// Stable string id used in project files and settings.
    pub fn id(&self) -> &'static str {
        match self {
            Tool::Brush => "basic-brush",
            Tool::Pencil => "pencil",
            Tool::FineLiner => "fine-liner",
            Tool::GPen => "g-pen",
            Tool::Marker => "marker",
            Tool::Airbrush => "airbrush",
            Tool::Eraser => "eraser",
            Tool::SmartBrush => "ai-smart-brush",
            Tool::AiDraw => "ai-draw",
        }
    }

    pub fn from_id(id: &str) -> Option<Tool> {
        Tool::all().iter().copied().find(|t| t.id() == id)
    }

    pub const fn category(&self) -> ToolCategory {
        match self {
            Tool::Pencil => ToolCategory::Sketch,
            Tool::FineLiner | Tool::GPen => ToolCategory::Ink,
            Tool::Brush | Tool::Marker | Tool::Airbrush => ToolCategory::Paint,
            Tool::Eraser => ToolCategory::Erase,
            Tool::SmartBrush | Tool::AiDraw => ToolCategory::Ai,
        }
    }

    /// AI-assisted tools bypass direct painting and feed the region bridge.
    pub fn is_ai(&self) -> bool {
        matches!(self, Tool::SmartBrush | Tool::AiDraw)
    }

    pub fn is_eraser(&self) -> bool {
        matches!(self, Tool::Eraser)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tool::Brush => "Brush",
            Tool::Pencil => "Pencil",
            Tool::FineLiner => "Fine Liner",
            Tool::GPen => "G-Pen",
            Tool::Marker => "Marker",
            Tool::Airbrush => "Airbrush",
            Tool::Eraser => "Eraser",
            Tool::SmartBrush => "Smart Brush",
            Tool::AiDraw => "AI Draw",
        }
    }
}

// ============================================================================
// BRUSH SETTINGS
// ============================================================================

/// Stamp silhouette.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TipShape {
    #[default]
    Round,
    /// Flattened ellipse, oriented by `BrushSettings::rotation`.
    Chisel,
}

impl TipShape {
    pub fn id(&self) -> &'static str {
        match self {
            TipShape::Round => "round",
            TipShape::Chisel => "chisel",
        }
    }

    pub fn from_id(id: &str) -> Self {
        match id {
            "chisel" => TipShape::Chisel,
            _ => TipShape::Round,
        }
    }
}

/// Stroke-width taper at the ends of a stroke.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tapering {
    pub enabled: bool,
    /// Fraction of the stroke ramp-in length, 0..=1 of the taper window.
    pub start_taper: f32,
    pub end_taper: f32,
}

impl Default for Tapering {
    fn default() -> Self {
        Self {
            enabled: false,
            start_taper: 0.0,
            end_taper: 0.0,
        }
    }
}

/// Live stroke parameters. Preset values are copied in on tool switch and
/// then freely editable until the next switch.
#[derive(Clone, Debug, PartialEq)]
pub struct BrushSettings {
    /// Stamp diameter in canvas pixels.
    pub size: f32,
    /// Percent, 0..=100.
    pub opacity: u8,
    /// 0 = fully soft falloff, 1 = hard edge.
    pub hardness: f32,
    pub tip_shape: TipShape,
    pub pressure_sensitivity: bool,
    /// Stamp spacing as a fraction of the brush diameter.
    pub spacing: f32,
    /// Random positional offset as a fraction of the brush diameter.
    pub scattering: f32,
    /// Tip rotation in degrees (chisel tips only).
    pub rotation: f32,
    /// Scales per-stamp alpha, 0..=1.
    pub flow_rate: f32,
    /// Input-position smoothing strength, 0 = raw input, 1 = heavy smoothing.
    pub smoothing: f32,
    pub tapering: Tapering,
}

impl Default for BrushSettings {
    fn default() -> Self {
        config_for(Tool::Brush).default_settings.clone()
    }
}

// ============================================================================
// PEN CONFIGURATION CATALOG
// ============================================================================

/// Static catalog entry mapping a tool to its category, default settings and
/// size bounds. Read-only at runtime.
#[derive(Clone, Debug)]
pub struct PenConfiguration {
    pub tool: Tool,
    pub category: ToolCategory,
    pub default_settings: BrushSettings,
    pub min_size: f32,
    pub max_size: f32,
}

impl PenConfiguration {
    /// Clamp a requested size into this pen's bounds.
    pub fn clamp_size(&self, size: f32) -> f32 {
        size.clamp(self.min_size, self.max_size)
    }
}

macro_rules! pen {
    ($tool:expr, min: $min:expr, max: $max:expr, $settings:expr) => {
        PenConfiguration {
            tool: $tool,
            category: $tool.category(),
            default_settings: $settings,
            min_size: $min,
            max_size: $max,
        }
    };
}

const NO_TAPER: Tapering = Tapering {
    enabled: false,
    start_taper: 0.0,
    end_taper: 0.0,
};

static CATALOG: [PenConfiguration; 9] = [
    pen!(Tool::Brush, min: 1.0, max: 200.0, BrushSettings {
        size: 8.0,
        opacity: 100,
        hardness: 0.8,
        tip_shape: TipShape::Round,
        pressure_sensitivity: true,
        spacing: 0.1,
        scattering: 0.0,
        rotation: 0.0,
        flow_rate: 1.0,
        smoothing: 0.2,
        tapering: NO_TAPER,
    }),
    pen!(Tool::Pencil, min: 0.5, max: 24.0, BrushSettings {
        size: 2.0,
        opacity: 90,
        hardness: 0.95,
        tip_shape: TipShape::Round,
        pressure_sensitivity: true,
        spacing: 0.05,
        scattering: 0.0,
        rotation: 0.0,
        flow_rate: 1.0,
        smoothing: 0.1,
        tapering: NO_TAPER,
    }),
    pen!(Tool::FineLiner, min: 0.25, max: 8.0, BrushSettings {
        size: 0.5,
        opacity: 100,
        hardness: 1.0,
        tip_shape: TipShape::Round,
        pressure_sensitivity: false,
        spacing: 0.05,
        scattering: 0.0,
        rotation: 0.0,
        flow_rate: 1.0,
        smoothing: 0.5,
        tapering: Tapering {
            enabled: true,
            start_taper: 0.2,
            end_taper: 0.35,
        },
    }),
    pen!(Tool::GPen, min: 0.5, max: 16.0, BrushSettings {
        size: 1.5,
        opacity: 100,
        hardness: 0.9,
        tip_shape: TipShape::Round,
        pressure_sensitivity: true,
        spacing: 0.05,
        scattering: 0.0,
        rotation: 0.0,
        flow_rate: 1.0,
        smoothing: 0.4,
        tapering: Tapering {
            enabled: true,
            start_taper: 0.3,
            end_taper: 0.5,
        },
    }),
    pen!(Tool::Marker, min: 2.0, max: 120.0, BrushSettings {
        size: 14.0,
        opacity: 80,
        hardness: 0.6,
        tip_shape: TipShape::Chisel,
        pressure_sensitivity: false,
        spacing: 0.15,
        scattering: 0.0,
        rotation: 45.0,
        flow_rate: 0.9,
        smoothing: 0.2,
        tapering: NO_TAPER,
    }),
    pen!(Tool::Airbrush, min: 4.0, max: 300.0, BrushSettings {
        size: 32.0,
        opacity: 100,
        hardness: 0.05,
        tip_shape: TipShape::Round,
        pressure_sensitivity: true,
        spacing: 0.2,
        scattering: 0.25,
        rotation: 0.0,
        flow_rate: 0.25,
        smoothing: 0.2,
        tapering: NO_TAPER,
    }),
    pen!(Tool::Eraser, min: 1.0, max: 300.0, BrushSettings {
        size: 16.0,
        opacity: 100,
        hardness: 0.7,
        tip_shape: TipShape::Round,
        pressure_sensitivity: true,
        spacing: 0.1,
        scattering: 0.0,
        rotation: 0.0,
        flow_rate: 1.0,
        smoothing: 0.2,
        tapering: NO_TAPER,
    }),
    pen!(Tool::SmartBrush, min: 4.0, max: 200.0, BrushSettings {
        size: 24.0,
        opacity: 100,
        hardness: 0.5,
        tip_shape: TipShape::Round,
        pressure_sensitivity: false,
        spacing: 0.25,
        scattering: 0.0,
        rotation: 0.0,
        flow_rate: 1.0,
        smoothing: 0.3,
        tapering: NO_TAPER,
    }),
    pen!(Tool::AiDraw, min: 8.0, max: 400.0, BrushSettings {
        size: 48.0,
        opacity: 100,
        hardness: 0.5,
        tip_shape: TipShape::Round,
        pressure_sensitivity: false,
        spacing: 0.25,
        scattering: 0.0,
        rotation: 0.0,
        flow_rate: 1.0,
        smoothing: 0.3,
        tapering: NO_TAPER,
    }),
];

/// Catalog lookup by tool.
pub fn config_for(tool: Tool) -> &'static PenConfiguration {
    CATALOG
        .iter()
        .find(|c| c.tool == tool)
        .unwrap_or(&CATALOG[0])
}

/// Catalog lookup by string id. Unknown ids fall back to the basic brush
/// rather than failing, so stale ids in old files never break tool selection.
pub fn lookup(id: &str) -> &'static PenConfiguration {
    match Tool::from_id(id) {
        Some(tool) => config_for(tool),
        None => &CATALOG[0],
    }
}
