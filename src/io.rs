//! File handling: project JSON load/save, importing plain images as
//! single-layer projects, and exporting the flattened composite.

use std::path::Path;

use image::RgbaImage;

use crate::canvas::{CanvasState, TiledImage};
use crate::log_info;
use crate::project::{
    decode_project, encode_project, CharacterMetadata, DecodedProject, ProjectError,
};
use crate::tools::BrushSettings;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum FileError {
    Read(String),
    Write(String),
    Project(ProjectError),
    Image(String),
    UnsupportedFormat(String),
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileError::Read(e) => write!(f, "Failed to read file: {}", e),
            FileError::Write(e) => write!(f, "Failed to write file: {}", e),
            FileError::Project(e) => write!(f, "{}", e),
            FileError::Image(e) => write!(f, "Image error: {}", e),
            FileError::UnsupportedFormat(ext) => {
                write!(f, "Unsupported output format \"{}\" (png, jpg)", ext)
            }
        }
    }
}

impl std::error::Error for FileError {}

impl From<ProjectError> for FileError {
    fn from(e: ProjectError) -> Self {
        FileError::Project(e)
    }
}

// ============================================================================
// PROJECT FILES
// ============================================================================

/// Read and decode a project JSON file.
pub fn load_project_file(path: &Path) -> Result<DecodedProject, FileError> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| FileError::Read(format!("{}: {}", path.display(), e)))?;
    let decoded = decode_project(&json)?;
    log_info!(
        "Loaded project {} ({} layers, {}x{})",
        path.display(),
        decoded.canvas.layers.len(),
        decoded.canvas.width,
        decoded.canvas.height
    );
    Ok(decoded)
}

/// Serialize and write a project JSON file.
pub fn save_project_file(
    path: &Path,
    canvas: &CanvasState,
    character: &CharacterMetadata,
    selected_pose: Option<&str>,
    brush_settings: &BrushSettings,
) -> Result<(), FileError> {
    let json = encode_project(canvas, character, selected_pose, brush_settings)?;
    std::fs::write(path, json)
        .map_err(|e| FileError::Write(format!("{}: {}", path.display(), e)))?;
    log_info!("Saved project {}", path.display());
    Ok(())
}

// ============================================================================
// IMAGE IMPORT / EXPORT
// ============================================================================

/// Load a plain raster file as a one-layer canvas (the image becomes the
/// background layer's pixels).
pub fn load_image_as_canvas(path: &Path) -> Result<CanvasState, FileError> {
    let image = image::open(path)
        .map_err(|e| FileError::Image(format!("{}: {}", path.display(), e)))?
        .to_rgba8();
    let mut canvas = CanvasState::new(image.width(), image.height());
    canvas.layers[0].pixels = TiledImage::from_rgba_image(&image);
    canvas.mark_dirty();
    Ok(canvas)
}

/// Write the flattened composite to `path`; the format is chosen by
/// extension (png or jpg/jpeg). JPEG flattens transparency onto white.
pub fn export_composite(canvas: &CanvasState, path: &Path) -> Result<(), FileError> {
    let composite = canvas.composite();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => composite
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| FileError::Write(e.to_string()))?,
        "jpg" | "jpeg" => {
            let flattened = flatten_on_white(&composite);
            image::DynamicImage::ImageRgb8(flattened)
                .save_with_format(path, image::ImageFormat::Jpeg)
                .map_err(|e| FileError::Write(e.to_string()))?;
        }
        other => return Err(FileError::UnsupportedFormat(other.to_string())),
    }
    log_info!("Exported composite to {}", path.display());
    Ok(())
}

fn flatten_on_white(src: &RgbaImage) -> image::RgbImage {
    let mut out = image::RgbImage::new(src.width(), src.height());
    for (x, y, px) in src.enumerate_pixels() {
        let a = px[3] as f32 / 255.0;
        let blend = |c: u8| (c as f32 * a + 255.0 * (1.0 - a)).round() as u8;
        out.put_pixel(x, y, image::Rgb([blend(px[0]), blend(px[1]), blend(px[2])]));
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod test {
    use super::*;
    use image::Rgba;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("characanvas-io-test");
        let _ = std::fs::create_dir_all(&dir);
        dir.join(name)
    }

    #[test]
    fn project_file_round_trips() {
        let mut canvas = CanvasState::new(24, 24);
        let ink = canvas.add_layer("Ink");
        canvas
            .layer_mut(ink)
            .unwrap()
            .pixels
            .put_pixel(3, 3, Rgba([0, 0, 0, 255]));

        let path = temp_path("roundtrip.json");
        save_project_file(
            &path,
            &canvas,
            &CharacterMetadata::default(),
            Some("sitting"),
            &BrushSettings::default(),
        )
        .unwrap();

        let decoded = load_project_file(&path).unwrap();
        assert_eq!(decoded.canvas.layers.len(), 2);
        assert_eq!(decoded.selected_pose.as_deref(), Some("sitting"));
        assert_eq!(
            *decoded.canvas.layers[1].pixels.get_pixel(3, 3),
            Rgba([0, 0, 0, 255])
        );
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn export_rejects_unknown_extension() {
        let canvas = CanvasState::new(8, 8);
        let err = export_composite(&canvas, &temp_path("out.webp2")).unwrap_err();
        assert!(matches!(err, FileError::UnsupportedFormat(_)));
    }

    #[test]
    fn export_png_writes_a_decodable_file() {
        let canvas = CanvasState::new(8, 8);
        let path = temp_path("out.png");
        export_composite(&canvas, &path).unwrap();
        let back = image::open(&path).unwrap().to_rgba8();
        assert_eq!(back.dimensions(), (8, 8));
        // Background layer is white.
        assert_eq!(*back.get_pixel(4, 4), Rgba([255, 255, 255, 255]));
        let _ = std::fs::remove_file(path);
    }
}
