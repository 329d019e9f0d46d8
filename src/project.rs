//! Project document: the serializable bundle of canvas state, layers,
//! character metadata and live brush settings.
//!
//! Wire format is a JSON object `{schemaVersion, canvasState, layers,
//! characterData, selectedPose, currentBrushSettings}` where each layer's
//! buffer is re-encoded as a base64 PNG data-URL. A `schemaVersion` tag
//! guards decoding: documents written by a newer format are rejected instead
//! of being half-read.

use std::io::Cursor;

use base64::Engine;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::{BlendMode, CanvasState, Layer, LayerId, TiledImage};
use crate::tools::{BrushSettings, Tapering, TipShape, Tool};

/// Current serialization format version.
pub const SCHEMA_VERSION: u32 = 1;

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum ProjectError {
    Encode(String),
    Decode(String),
    /// Document written by a newer format than this build understands.
    UnsupportedVersion(u32),
}

impl std::fmt::Display for ProjectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectError::Encode(e) => write!(f, "Failed to encode project: {}", e),
            ProjectError::Decode(e) => write!(f, "Failed to decode project: {}", e),
            ProjectError::UnsupportedVersion(v) => {
                write!(
                    f,
                    "Project uses schema version {} but this build supports up to {}",
                    v, SCHEMA_VERSION
                )
            }
        }
    }
}

impl std::error::Error for ProjectError {}

// ============================================================================
// CHARACTER METADATA
// ============================================================================

/// Auxiliary character data carried with every save and snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CharacterMetadata {
    pub name: String,
    pub style: String,
    pub traits: Vec<String>,
    pub notes: String,
}

// ============================================================================
// PROJECT
// ============================================================================

/// Single open document: the canvas plus everything saved alongside it.
pub struct Project {
    pub id: Uuid,
    pub canvas: CanvasState,
    pub character: CharacterMetadata,
    pub selected_pose: Option<String>,
    /// Live brush settings at save time, restored on open.
    pub brush_settings: BrushSettings,
    /// Display name (derived from path or "Untitled-N").
    pub name: String,
    pub is_dirty: bool,
}

impl Project {
    pub fn new_untitled(untitled_counter: usize, width: u32, height: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            canvas: CanvasState::new(width, height),
            character: CharacterMetadata::default(),
            selected_pose: None,
            brush_settings: BrushSettings::default(),
            name: format!("Untitled-{}", untitled_counter),
            is_dirty: false,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    /// Serialize to the JSON wire format.
    pub fn encode(&self) -> Result<String, ProjectError> {
        encode_project(
            &self.canvas,
            &self.character,
            self.selected_pose.as_deref(),
            &self.brush_settings,
        )
    }
}

// ============================================================================
// PNG DATA-URL CODEC
// ============================================================================

/// Encode an image as PNG bytes.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ProjectError> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .map_err(|e| ProjectError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Encode an image as a `data:image/png;base64,...` URL.
pub fn encode_png_data_url(image: &RgbaImage) -> Result<String, ProjectError> {
    let bytes = encode_png(image)?;
    let mut out = String::from(DATA_URL_PREFIX);
    out.push_str(&base64::engine::general_purpose::STANDARD.encode(&bytes));
    Ok(out)
}

/// Decode base64 PNG pixels, accepting the payload with or without the
/// data-URL prefix.
pub fn decode_base64_png(data: &str) -> Result<RgbaImage, ProjectError> {
    let payload = data.strip_prefix(DATA_URL_PREFIX).unwrap_or(data);
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ProjectError::Decode(format!("invalid base64: {}", e)))?;
    let image = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)
        .map_err(|e| ProjectError::Decode(format!("invalid PNG: {}", e)))?;
    Ok(image.to_rgba8())
}

// ============================================================================
// WIRE DTOS
// ============================================================================

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDoc {
    schema_version: u32,
    canvas_state: CanvasStateDoc,
    layers: Vec<LayerDoc>,
    character_data: CharacterMetadata,
    selected_pose: Option<String>,
    current_brush_settings: BrushSettingsDoc,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CanvasStateDoc {
    width: u32,
    height: u32,
    zoom: f32,
    position: (f32, f32),
    tool: String,
    color: [u8; 4],
    size: f32,
    opacity: u8,
    blend_mode: String,
    active_layer_id: String,
    has_drawing: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayerDoc {
    id: String,
    name: String,
    visible: bool,
    opacity: u8,
    blend_mode: String,
    locked: bool,
    /// base64 PNG data-URL of the layer's pixels.
    data: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrushSettingsDoc {
    size: f32,
    opacity: u8,
    hardness: f32,
    tip_shape: String,
    pressure_sensitivity: bool,
    spacing: f32,
    scattering: f32,
    rotation: f32,
    flow_rate: f32,
    smoothing: f32,
    tapering: TaperingDoc,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaperingDoc {
    enabled: bool,
    start_taper: f32,
    end_taper: f32,
}

impl BrushSettingsDoc {
    fn from_settings(s: &BrushSettings) -> Self {
        Self {
            size: s.size,
            opacity: s.opacity,
            hardness: s.hardness,
            tip_shape: s.tip_shape.id().to_string(),
            pressure_sensitivity: s.pressure_sensitivity,
            spacing: s.spacing,
            scattering: s.scattering,
            rotation: s.rotation,
            flow_rate: s.flow_rate,
            smoothing: s.smoothing,
            tapering: TaperingDoc {
                enabled: s.tapering.enabled,
                start_taper: s.tapering.start_taper,
                end_taper: s.tapering.end_taper,
            },
        }
    }

    fn into_settings(self) -> BrushSettings {
        BrushSettings {
            size: self.size,
            opacity: self.opacity.min(100),
            hardness: self.hardness,
            tip_shape: TipShape::from_id(&self.tip_shape),
            pressure_sensitivity: self.pressure_sensitivity,
            spacing: self.spacing,
            scattering: self.scattering,
            rotation: self.rotation,
            flow_rate: self.flow_rate,
            smoothing: self.smoothing,
            tapering: Tapering {
                enabled: self.tapering.enabled,
                start_taper: self.tapering.start_taper,
                end_taper: self.tapering.end_taper,
            },
        }
    }
}

// ============================================================================
// ENCODE / DECODE
// ============================================================================

pub struct DecodedProject {
    pub canvas: CanvasState,
    pub character: CharacterMetadata,
    pub selected_pose: Option<String>,
    pub brush_settings: BrushSettings,
}

/// Serialize the full canvas plus auxiliary data to the JSON wire format.
/// Every layer buffer is flattened and re-encoded as PNG.
pub fn encode_project(
    canvas: &CanvasState,
    character: &CharacterMetadata,
    selected_pose: Option<&str>,
    brush_settings: &BrushSettings,
) -> Result<String, ProjectError> {
    let mut layers = Vec::with_capacity(canvas.layers.len());
    for layer in &canvas.layers {
        layers.push(LayerDoc {
            id: layer.id.to_string(),
            name: layer.name.clone(),
            visible: layer.visible,
            opacity: layer.opacity,
            blend_mode: layer.blend_mode.id().to_string(),
            locked: layer.locked,
            data: encode_png_data_url(&layer.pixels.to_rgba_image())?,
        });
    }

    let doc = ProjectDoc {
        schema_version: SCHEMA_VERSION,
        canvas_state: CanvasStateDoc {
            width: canvas.width,
            height: canvas.height,
            zoom: canvas.zoom,
            position: canvas.position,
            tool: canvas.tool.id().to_string(),
            color: canvas.color.0,
            size: canvas.brush_size,
            opacity: canvas.brush_opacity,
            blend_mode: canvas.blend_mode.id().to_string(),
            active_layer_id: canvas.active_layer_id.to_string(),
            has_drawing: canvas.has_drawing,
        },
        layers,
        character_data: character.clone(),
        selected_pose: selected_pose.map(str::to_string),
        current_brush_settings: BrushSettingsDoc::from_settings(brush_settings),
    };

    serde_json::to_string(&doc).map_err(|e| ProjectError::Encode(e.to_string()))
}

/// Decode the JSON wire format back into live state. Any failure leaves the
/// caller's state untouched since a fresh `CanvasState` is built here.
pub fn decode_project(json: &str) -> Result<DecodedProject, ProjectError> {
    let doc: ProjectDoc =
        serde_json::from_str(json).map_err(|e| ProjectError::Decode(e.to_string()))?;
    if doc.schema_version > SCHEMA_VERSION {
        return Err(ProjectError::UnsupportedVersion(doc.schema_version));
    }
    if doc.layers.is_empty() {
        return Err(ProjectError::Decode("document has no layers".into()));
    }

    let cs = &doc.canvas_state;
    let mut canvas = CanvasState::new(cs.width, cs.height);
    canvas.zoom = cs.zoom;
    canvas.position = cs.position;
    canvas.tool = Tool::from_id(&cs.tool).unwrap_or_default();
    canvas.color = image::Rgba(cs.color);
    canvas.brush_size = cs.size;
    canvas.brush_opacity = cs.opacity.min(100);
    canvas.blend_mode = BlendMode::from_id(&cs.blend_mode);
    canvas.has_drawing = cs.has_drawing;

    let mut layers = Vec::with_capacity(doc.layers.len());
    for layer_doc in doc.layers {
        let pixels = decode_base64_png(&layer_doc.data)?;
        let id: LayerId = layer_doc
            .id
            .parse()
            .map_err(|_| ProjectError::Decode(format!("invalid layer id {}", layer_doc.id)))?;
        let mut layer = Layer::new(layer_doc.name, cs.width, cs.height);
        layer.id = id;
        layer.visible = layer_doc.visible;
        layer.opacity = layer_doc.opacity.min(100);
        layer.blend_mode = BlendMode::from_id(&layer_doc.blend_mode);
        layer.locked = layer_doc.locked;
        layer.pixels = TiledImage::from_rgba_image(&pixels);
        layers.push(layer);
    }

    canvas.active_layer_id = cs
        .active_layer_id
        .parse()
        .ok()
        .filter(|id| layers.iter().any(|l| l.id == *id))
        .unwrap_or(layers[0].id);
    canvas.layers = layers;
    canvas.mark_dirty();

    Ok(DecodedProject {
        canvas,
        character: doc.character_data,
        selected_pose: doc.selected_pose,
        brush_settings: doc.current_brush_settings.into_settings(),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::canvas::LayerPatch;
    use image::Rgba;

    fn sample_project() -> (CanvasState, CharacterMetadata, BrushSettings) {
        let mut canvas = CanvasState::new(48, 32);
        let sketch = canvas.add_layer("Sketch");
        for i in 0..16 {
            canvas
                .layer_mut(sketch)
                .unwrap()
                .pixels
                .put_pixel(i, i, Rgba([200, 30, 90, 255]));
        }
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
        canvas.has_drawing = true;
        canvas.zoom = 1.5;
        canvas.position = (-10.0, 24.0);

        let character = CharacterMetadata {
            name: "Yume".into(),
            style: "watercolor".into(),
            traits: vec!["silver hair".into(), "red scarf".into()],
            notes: "side profile".into(),
        };
        (canvas, character, BrushSettings::default())
    }

    #[test]
    fn round_trip_is_lossless_for_state_and_character() {
        let (canvas, character, brush) = sample_project();
        let json = encode_project(&canvas, &character, Some("standing"), &brush).unwrap();
        let decoded = decode_project(&json).unwrap();

        assert_eq!(decoded.canvas.width, canvas.width);
        assert_eq!(decoded.canvas.height, canvas.height);
        assert_eq!(decoded.canvas.zoom, canvas.zoom);
        assert_eq!(decoded.canvas.position, canvas.position);
        assert_eq!(decoded.canvas.tool, canvas.tool);
        assert_eq!(decoded.canvas.has_drawing, canvas.has_drawing);
        assert_eq!(decoded.canvas.active_layer_id, canvas.active_layer_id);
        assert_eq!(decoded.character, character);
        assert_eq!(decoded.selected_pose.as_deref(), Some("standing"));
        assert_eq!(decoded.brush_settings, brush);

        // Buffers compare equal by re-encoded PNG bytes.
        assert_eq!(decoded.canvas.layers.len(), canvas.layers.len());
        for (a, b) in decoded.canvas.layers.iter().zip(canvas.layers.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.name, b.name);
            assert_eq!(a.opacity, b.opacity);
            assert_eq!(a.blend_mode, b.blend_mode);
            let a_png = encode_png(&a.pixels.to_rgba_image()).unwrap();
            let b_png = encode_png(&b.pixels.to_rgba_image()).unwrap();
            assert_eq!(a_png, b_png);
        }
    }

    #[test]
    fn newer_schema_version_is_rejected() {
        let (canvas, character, brush) = sample_project();
        let json = encode_project(&canvas, &character, None, &brush).unwrap();
        let bumped = json.replacen(
            &format!("\"schemaVersion\":{}", SCHEMA_VERSION),
            &format!("\"schemaVersion\":{}", SCHEMA_VERSION + 1),
            1,
        );
        match decode_project(&bumped) {
            Err(ProjectError::UnsupportedVersion(v)) => assert_eq!(v, SCHEMA_VERSION + 1),
            other => panic!("expected UnsupportedVersion, got {:?}", other.err()),
        }
    }

    #[test]
    fn corrupt_document_fails_without_panicking() {
        assert!(decode_project("not json at all").is_err());
        assert!(decode_project("{\"schemaVersion\":1}").is_err());
    }

    #[test]
    fn data_url_codec_round_trips() {
        let mut img = RgbaImage::new(8, 8);
        img.put_pixel(3, 4, Rgba([1, 2, 3, 200]));
        let url = encode_png_data_url(&img).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        let back = decode_base64_png(&url).unwrap();
        assert_eq!(img.as_raw(), back.as_raw());
    }

    #[test]
    fn unknown_tool_and_blend_ids_degrade_gracefully() {
        let (canvas, character, brush) = sample_project();
        let json = encode_project(&canvas, &character, None, &brush).unwrap();
        let patched = json
            .replacen("\"tool\":\"basic-brush\"", "\"tool\":\"mystery-tool\"", 1)
            .replacen("\"blendMode\":\"multiply\"", "\"blendMode\":\"weird\"", 1);
        let decoded = decode_project(&patched).unwrap();
        assert_eq!(decoded.canvas.tool, Tool::Brush);
    }
}
