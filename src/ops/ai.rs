// ============================================================================
// AI OPERATIONS - remote region-edit and outline-generation integration
// ============================================================================
//
// The drawing studio's AI features live behind a remote HTTP service. This
// module owns the wire protocol (request/response JSON) and the merge rules;
// the transport itself is injected through the `AiTransport` trait so the
// engine stays testable and the binary carries no compile-time dependency on
// any particular HTTP stack.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::canvas::{CanvasState, LayerId};
use crate::log_err;
use crate::project::{decode_base64_png, encode_png_data_url};

/// Service endpoint consumed by region edits.
pub const AI_DRAW_ENDPOINT: &str = "/api/anime-chara/ai-draw";
/// Service endpoint consumed by outline generation.
pub const OUTLINE_ENDPOINT: &str = "/api/anime-chara-helper/generate-outline";

/// Outline generation retries: total attempts and the fixed pause between
/// them. Region edits never retry.
pub const OUTLINE_RETRY_ATTEMPTS: u32 = 2;
pub const OUTLINE_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(2);

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum AiError {
    /// Transport-level failure (connection refused, timeout, DNS).
    Network(String),
    /// The service answered with a non-success status.
    Service { status: u16, message: String },
    /// The response body could not be understood.
    Decode(String),
    /// Rejected locally before any request was made.
    EmptyPrompt,
    /// The canvas changed while the request was in flight; the result was
    /// dropped instead of being applied to stale state.
    StaleResult,
}

impl std::fmt::Display for AiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiError::Network(e) => write!(f, "Network error: {}", e),
            AiError::Service { status, message } => {
                write!(f, "AI service error (HTTP {}): {}", status, message)
            }
            AiError::Decode(e) => write!(f, "Invalid AI image payload: {}", e),
            AiError::EmptyPrompt => write!(f, "Prompt must not be empty"),
            AiError::StaleResult => write!(f, "Canvas changed while the request was in flight"),
        }
    }
}

impl std::error::Error for AiError {}

// ============================================================================
// WIRE TYPES
// ============================================================================

/// Rectangular canvas region in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// How the service should rework the submitted region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AiDrawMode {
    /// Clean up and sharpen the existing strokes.
    Enhance,
    /// Turn rough strokes into clean line art.
    LineArt,
    /// Flat-color the region guided by the existing sketch.
    Colorize,
    /// Regenerate the region from scratch.
    Redraw,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiDrawRequest {
    /// Region pixels as a base64 PNG data-URL.
    pub image_data: String,
    pub mode: AiDrawMode,
    /// How strongly the service may deviate from the input, 0..=1.
    pub strength: f32,
    pub region: Region,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiDrawResponse {
    /// Result pixels, base64 PNG.
    pub image_data: String,
}

/// Outline generation source: either an uploaded reference image or a text
/// prompt.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutlineRequest {
    #[serde(rename = "image", rename_all = "camelCase")]
    FromImage {
        /// Reference image as a base64 PNG data-URL.
        image: String,
        strength: f32,
    },
    #[serde(rename = "prompt", rename_all = "camelCase")]
    FromPrompt { prompt: String, detail_level: u8 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineResponse {
    pub outline_url: String,
}

// ============================================================================
// TRANSPORT SEAM
// ============================================================================

/// Blocking transport to the remote AI service. Implementations post the
/// serialized request JSON to the matching endpoint and hand back the parsed
/// response, mapping HTTP failures onto `AiError`.
pub trait AiTransport: Send + Sync {
    fn ai_draw(&self, request: &AiDrawRequest) -> Result<AiDrawResponse, AiError>;
    fn generate_outline(&self, request: &OutlineRequest) -> Result<OutlineResponse, AiError>;
}

// ============================================================================
// REGION BRIDGE
// ============================================================================

/// Packages a canvas region into a request, sends it, and merges the result
/// into a NEW layer. Existing layers are never mutated, so an applied edit is
/// reversible by hiding or deleting the result layer.
pub struct AiRegionBridge<T: AiTransport> {
    transport: T,
}

impl<T: AiTransport> AiRegionBridge<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Crop the composited canvas to `region` and request a rework.
    /// Returns the decoded result pixels; apply them with
    /// [`apply_region_result`].
    pub fn request_region_edit(
        &self,
        canvas: &CanvasState,
        mode: AiDrawMode,
        strength: f32,
        region: Region,
    ) -> Result<RgbaImage, AiError> {
        let composite = canvas.composite();
        let crop = image::imageops::crop_imm(
            &composite,
            region.x.min(composite.width().saturating_sub(1)),
            region.y.min(composite.height().saturating_sub(1)),
            region.width.max(1),
            region.height.max(1),
        )
        .to_image();

        let request = AiDrawRequest {
            image_data: encode_png_data_url(&crop).map_err(|e| AiError::Decode(e.to_string()))?,
            mode,
            strength: strength.clamp(0.0, 1.0),
            region,
        };
        let response = self.transport.ai_draw(&request)?;
        decode_base64_png(&response.image_data).map_err(|e| AiError::Decode(e.to_string()))
    }

    /// Generate an outline from a reference image or prompt. The
    /// character-generation path retries transient failures, capped at
    /// `OUTLINE_RETRY_ATTEMPTS` with a fixed delay between attempts. An empty
    /// prompt is rejected locally with no request made.
    pub fn generate_outline(&self, request: &OutlineRequest) -> Result<OutlineResponse, AiError> {
        if let OutlineRequest::FromPrompt { prompt, .. } = request
            && prompt.trim().is_empty()
        {
            return Err(AiError::EmptyPrompt);
        }

        let mut last_err = None;
        for attempt in 1..=OUTLINE_RETRY_ATTEMPTS {
            match self.transport.generate_outline(request) {
                Ok(response) => return Ok(response),
                Err(e) => {
                    log_err!("Outline generation attempt {} failed: {}", attempt, e);
                    last_err = Some(e);
                    if attempt < OUTLINE_RETRY_ATTEMPTS {
                        std::thread::sleep(OUTLINE_RETRY_DELAY);
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| AiError::Network("no attempts made".into())))
    }
}

/// Host `result` pixels in a brand-new layer positioned at `region`.
///
/// `expected_generation` is the canvas dirty generation captured when the
/// request was issued; if the canvas has changed since, the result is stale
/// and is dropped rather than applied.
pub fn apply_region_result(
    canvas: &mut CanvasState,
    region: Region,
    result: &RgbaImage,
    expected_generation: u64,
) -> Result<LayerId, AiError> {
    if canvas.dirty_generation != expected_generation {
        log_err!(
            "Dropping stale AI result (generation {} != {})",
            expected_generation,
            canvas.dirty_generation
        );
        return Err(AiError::StaleResult);
    }

    let id = canvas.add_layer("AI Result");
    let layer = canvas.layer_mut(id).expect("layer just added");
    for (dx, dy, px) in result.enumerate_pixels() {
        if px[3] == 0 {
            continue;
        }
        layer.pixels.put_pixel(region.x + dx, region.y + dy, *px);
    }
    canvas.mark_dirty();
    Ok(id)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod test {
    use super::*;
    use image::Rgba;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Transport double: records calls, optionally fails the first N.
    struct FakeTransport {
        calls: AtomicU32,
        fail_first: u32,
        result: RgbaImage,
    }

    impl FakeTransport {
        fn new(fail_first: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
                result: RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255])),
            }
        }
    }

    impl AiTransport for FakeTransport {
        fn ai_draw(&self, request: &AiDrawRequest) -> Result<AiDrawResponse, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(request.image_data.starts_with("data:image/png;base64,"));
            Ok(AiDrawResponse {
                image_data: crate::project::encode_png_data_url(&self.result).unwrap(),
            })
        }

        fn generate_outline(&self, _request: &OutlineRequest) -> Result<OutlineResponse, AiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(AiError::Service {
                    status: 503,
                    message: "busy".into(),
                });
            }
            Ok(OutlineResponse {
                outline_url: "https://cdn.example/outline.png".into(),
            })
        }
    }

    #[test]
    fn region_edit_round_trips_through_transport() {
        let canvas = CanvasState::new(32, 32);
        let bridge = AiRegionBridge::new(FakeTransport::new(0));
        let region = Region { x: 4, y: 4, width: 8, height: 8 };
        let result = bridge
            .request_region_edit(&canvas, AiDrawMode::Enhance, 0.6, region)
            .unwrap();
        assert_eq!(result.dimensions(), (4, 4));
    }

    #[test]
    fn result_lands_in_a_new_layer_only() {
        let mut canvas = CanvasState::new(32, 32);
        let before_count = canvas.layers.len();
        let before_bg = canvas.layers[0].pixels.to_rgba_image();
        let generation = canvas.dirty_generation;

        let result = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let region = Region { x: 10, y: 10, width: 4, height: 4 };
        let id = apply_region_result(&mut canvas, region, &result, generation).unwrap();

        assert_eq!(canvas.layers.len(), before_count + 1);
        assert_eq!(canvas.active_layer_id, id);
        // The original layer is untouched; the edit is reversible by
        // deleting the new one.
        assert_eq!(canvas.layers[0].pixels.to_rgba_image().as_raw(), before_bg.as_raw());
        assert_eq!(
            *canvas.layer(id).unwrap().pixels.get_pixel(10, 10),
            Rgba([1, 2, 3, 255])
        );
    }

    #[test]
    fn stale_result_is_dropped() {
        let mut canvas = CanvasState::new(16, 16);
        let generation = canvas.dirty_generation;
        canvas.add_layer("Intervening edit");
        let result = RgbaImage::new(2, 2);
        let region = Region { x: 0, y: 0, width: 2, height: 2 };
        let layer_count = canvas.layers.len();
        match apply_region_result(&mut canvas, region, &result, generation) {
            Err(AiError::StaleResult) => {}
            other => panic!("expected StaleResult, got {:?}", other.err()),
        }
        assert_eq!(canvas.layers.len(), layer_count);
    }

    #[test]
    fn empty_prompt_is_rejected_locally() {
        let bridge = AiRegionBridge::new(FakeTransport::new(0));
        let req = OutlineRequest::FromPrompt {
            prompt: "   ".into(),
            detail_level: 3,
        };
        assert!(matches!(bridge.generate_outline(&req), Err(AiError::EmptyPrompt)));
        // No request was made.
        assert_eq!(bridge.transport.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn outline_generation_retries_once_then_succeeds() {
        let bridge = AiRegionBridge::new(FakeTransport::new(1));
        let req = OutlineRequest::FromPrompt {
            prompt: "twin-tail silver hair".into(),
            detail_level: 4,
        };
        let response = bridge.generate_outline(&req).unwrap();
        assert_eq!(response.outline_url, "https://cdn.example/outline.png");
        assert_eq!(bridge.transport.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn wire_format_matches_the_service_contract() {
        let req = AiDrawRequest {
            image_data: "data:image/png;base64,AAAA".into(),
            mode: AiDrawMode::LineArt,
            strength: 0.8,
            region: Region { x: 1, y: 2, width: 3, height: 4 },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["mode"], "line-art");
        assert_eq!(json["region"]["width"], 3);
        assert!(json["imageData"].as_str().unwrap().starts_with("data:image/png"));

        let outline = OutlineRequest::FromPrompt {
            prompt: "knight".into(),
            detail_level: 2,
        };
        let json = serde_json::to_value(&outline).unwrap();
        assert_eq!(json["type"], "prompt");
        assert_eq!(json["detailLevel"], 2);
    }
}
