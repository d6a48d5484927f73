//! File collaborators: the native `.rly` project format, raster image
//! import, and flattened export.
//!
//! Loading is all-or-nothing — a document is fully constructed and
//! validated before it is returned, so a failed load never leaves a
//! partially-mutated document behind. Pixel encoding/decoding is delegated
//! to the `image` and `tiff` codec crates.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tga::TgaEncoder;
use image::{DynamicImage, ImageError, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::PixelBuffer;
use crate::canvas::{BlendMode, CanvasState, Layer};
use crate::geometry::Point;

/// Errors surfaced by the file collaborators, for the shell to report.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(String),
    #[error("corrupt file: {0}")]
    Corrupt(String),
    #[error("unsupported format: {0}")]
    Unsupported(String),
}

impl From<Box<bincode::ErrorKind>> for FileError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        FileError::Serialize(e.to_string())
    }
}

// ============================================================================
// EXPORT FORMATS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveFormat {
    Png,
    Jpeg,
    Bmp,
    Tga,
    Tiff,
    /// Native project format — layers preserved, nothing flattened.
    Rly,
}

impl SaveFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(SaveFormat::Png),
            "jpg" | "jpeg" => Some(SaveFormat::Jpeg),
            "bmp" => Some(SaveFormat::Bmp),
            "tga" => Some(SaveFormat::Tga),
            "tif" | "tiff" => Some(SaveFormat::Tiff),
            "rly" => Some(SaveFormat::Rly),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Bmp => "bmp",
            SaveFormat::Tga => "tga",
            SaveFormat::Tiff => "tiff",
            SaveFormat::Rly => "rly",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TiffCompression {
    #[default]
    None,
    Lzw,
    Deflate,
}

// ============================================================================
// RLY PROJECT FILE FORMAT
// ============================================================================

/// Magic header for the v1 format.
const RLY_MAGIC_V1: &str = "RLY1";

/// Maximum supported canvas dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted project files.
const MAX_CANVAS_DIM: u32 = 32_768;
/// Maximum number of layers in a project file.
const MAX_LAYERS: usize = 256;

/// Serializable v1 project file structure.
#[derive(Serialize, Deserialize)]
struct ProjectFileV1 {
    magic: String,
    width: u32,
    height: u32,
    active_layer_index: Option<u32>,
    layers: Vec<LayerDataV1>,
}

/// Serializable layer data — flat RGBA bytes plus placement.
#[derive(Serialize, Deserialize)]
struct LayerDataV1 {
    name: String,
    visible: bool,
    opacity: f32,
    blend_mode: u8,
    offset_x: i32,
    offset_y: i32,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// Save a document as a `.rly` project file, preserving the full layer
/// stack (names, opacity, blend modes, offsets).
pub fn save_project(state: &CanvasState, path: &Path) -> Result<(), FileError> {
    let layers: Vec<LayerDataV1> = state
        .layers
        .iter()
        .map(|layer| LayerDataV1 {
            name: layer.name().to_string(),
            visible: layer.visible,
            opacity: layer.opacity(),
            blend_mode: layer.blend_mode.to_u8(),
            offset_x: layer.offset.x,
            offset_y: layer.offset.y,
            width: layer.pixels.width(),
            height: layer.pixels.height(),
            pixels: layer.pixels.as_raw().to_vec(),
        })
        .collect();

    let project = ProjectFileV1 {
        magic: RLY_MAGIC_V1.to_string(),
        width: state.width(),
        height: state.height(),
        active_layer_index: state.active_layer_index.map(|i| i as u32),
        layers,
    };

    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, &project)?;
    Ok(())
}

/// Load a `.rly` project file.
pub fn load_project(path: &Path) -> Result<CanvasState, FileError> {
    let raw = std::fs::read(path)?;
    if raw.len() < 12 {
        return Err(FileError::Corrupt("file too small".into()));
    }

    // bincode encodes a String as an 8-byte length prefix + UTF-8 data, so
    // for a 4-char magic the bytes 8..12 hold the magic itself.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    match magic {
        RLY_MAGIC_V1 => load_project_v1(&raw),
        _ => Err(FileError::Corrupt(format!("unknown magic '{}'", magic))),
    }
}

fn load_project_v1(raw: &[u8]) -> Result<CanvasState, FileError> {
    let project: ProjectFileV1 =
        bincode::deserialize(raw).map_err(|e| FileError::Corrupt(e.to_string()))?;

    if project.width == 0 || project.height == 0 {
        return Err(FileError::Corrupt("canvas dimensions cannot be zero".into()));
    }
    if project.width > MAX_CANVAS_DIM || project.height > MAX_CANVAS_DIM {
        return Err(FileError::Corrupt(format!(
            "canvas size {}x{} exceeds maximum allowed {}x{}",
            project.width, project.height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
        )));
    }
    if project.layers.len() > MAX_LAYERS {
        return Err(FileError::Corrupt(format!(
            "project contains {} layers, which exceeds the maximum of {}",
            project.layers.len(),
            MAX_LAYERS
        )));
    }

    let mut layers = Vec::with_capacity(project.layers.len());
    for ld in project.layers {
        if ld.width == 0 || ld.height == 0 || ld.width > MAX_CANVAS_DIM || ld.height > MAX_CANVAS_DIM
        {
            return Err(FileError::Corrupt(format!(
                "layer '{}' has invalid dimensions {}x{}",
                ld.name, ld.width, ld.height
            )));
        }
        let expected = (ld.width as usize) * (ld.height as usize) * 4;
        if ld.pixels.len() != expected {
            return Err(FileError::Corrupt(format!(
                "layer '{}' holds {} pixel bytes, expected {}",
                ld.name,
                ld.pixels.len(),
                expected
            )));
        }
        let buffer = PixelBuffer::from_raw(ld.width, ld.height, ld.pixels).ok_or_else(|| {
            FileError::Corrupt(format!("failed to reconstruct pixels for layer '{}'", ld.name))
        })?;
        let mut layer = Layer::from_buffer(ld.name, buffer);
        layer.visible = ld.visible;
        layer.set_opacity_raw(ld.opacity);
        layer.blend_mode = BlendMode::from_u8(ld.blend_mode);
        layer.offset = Point::new(ld.offset_x, ld.offset_y);
        layers.push(layer);
    }

    Ok(CanvasState::from_parts(
        project.width,
        project.height,
        layers,
        project.active_layer_index.map(|i| i as usize),
    ))
}

// ============================================================================
// RASTER IMPORT
// ============================================================================

/// Load any supported file into a document.
///
/// `.rly` keeps its full layer stack; every raster format becomes a
/// single-layer document named after the file stem. Unknown extensions are
/// `Unsupported`, decoder failures `Corrupt`.
pub fn load_image(path: &Path) -> Result<CanvasState, FileError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "rly" => load_project(path),
        "png" | "jpg" | "jpeg" | "bmp" | "tga" | "tif" | "tiff" => {
            let img = image::open(path).map_err(map_decode_err)?.into_rgba8();
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Layer")
                .to_string();
            let (width, height) = img.dimensions();
            let layer = Layer::from_buffer(name, PixelBuffer::from_rgba_image(&img));
            Ok(CanvasState::from_parts(width, height, vec![layer], Some(0)))
        }
        other => Err(FileError::Unsupported(format!(
            "cannot load '.{}' files",
            other
        ))),
    }
}

fn map_decode_err(e: ImageError) -> FileError {
    match e {
        ImageError::IoError(io) => FileError::Io(io),
        other => FileError::Corrupt(other.to_string()),
    }
}

// ============================================================================
// FLATTENED EXPORT
// ============================================================================

/// Export a document to `path`. Raster formats receive the flattened
/// composite; `SaveFormat::Rly` preserves the layer stack.
pub fn export(
    state: &CanvasState,
    path: &Path,
    format: SaveFormat,
    quality: u8,
    tiff_compression: TiffCompression,
) -> Result<(), FileError> {
    if format == SaveFormat::Rly {
        return save_project(state, path);
    }
    let flat = state.composite().to_rgba_image();
    encode_and_write(&flat, path, format, quality, tiff_compression)
}

/// Encode one flat RGBA image to disk in the requested format.
pub fn encode_and_write(
    image: &RgbaImage,
    path: &Path,
    format: SaveFormat,
    quality: u8,
    tiff_compression: TiffCompression,
) -> Result<(), FileError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    match format {
        SaveFormat::Png => {
            let encoder = PngEncoder::new(&mut writer);
            #[allow(deprecated)]
            encoder
                .encode(
                    image.as_raw(),
                    image.width(),
                    image.height(),
                    image::ColorType::Rgba8,
                )
                .map_err(map_encode_err)?;
        }
        SaveFormat::Jpeg => {
            // JPEG has no alpha channel; drop it.
            let rgb_image = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
            encoder
                .encode(
                    rgb_image.as_raw(),
                    rgb_image.width(),
                    rgb_image.height(),
                    image::ColorType::Rgb8,
                )
                .map_err(map_encode_err)?;
        }
        SaveFormat::Bmp => {
            let mut encoder = BmpEncoder::new(&mut writer);
            encoder
                .encode(
                    image.as_raw(),
                    image.width(),
                    image.height(),
                    image::ColorType::Rgba8,
                )
                .map_err(map_encode_err)?;
        }
        SaveFormat::Tga => {
            let encoder = TgaEncoder::new(&mut writer);
            encoder
                .encode(
                    image.as_raw(),
                    image.width(),
                    image.height(),
                    image::ColorType::Rgba8,
                )
                .map_err(map_encode_err)?;
        }
        SaveFormat::Tiff => {
            let err_map = |e: tiff::TiffError| {
                FileError::Io(std::io::Error::other(format!("TIFF encode error: {}", e)))
            };
            let mut tiff_enc = tiff::encoder::TiffEncoder::new(&mut writer).map_err(err_map)?;
            match tiff_compression {
                TiffCompression::None => {
                    tiff_enc
                        .write_image::<tiff::encoder::colortype::RGBA8>(
                            image.width(),
                            image.height(),
                            image.as_raw(),
                        )
                        .map_err(err_map)?;
                }
                TiffCompression::Lzw => {
                    tiff_enc
                        .write_image_with_compression::<tiff::encoder::colortype::RGBA8, _>(
                            image.width(),
                            image.height(),
                            tiff::encoder::compression::Lzw,
                            image.as_raw(),
                        )
                        .map_err(err_map)?;
                }
                TiffCompression::Deflate => {
                    tiff_enc
                        .write_image_with_compression::<tiff::encoder::colortype::RGBA8, _>(
                            image.width(),
                            image.height(),
                            tiff::encoder::compression::Deflate::default(),
                            image.as_raw(),
                        )
                        .map_err(err_map)?;
                }
            }
        }
        SaveFormat::Rly => {
            unreachable!("RLY output is handled by save_project(), not encode_and_write()");
        }
    }

    Ok(())
}

fn map_encode_err(e: ImageError) -> FileError {
    match e {
        ImageError::IoError(io) => FileError::Io(io),
        other => FileError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::path::PathBuf;

    fn temp_path(ext: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rasterly-test-{}.{}", uuid::Uuid::new_v4(), ext))
    }

    #[test]
    fn project_round_trip_preserves_everything() {
        let mut doc = CanvasState::new(32, 24);
        let i = doc.add_layer("Ink", None);
        doc.layers[i].pixels.set(5, 6, Rgba([1, 2, 3, 4])).unwrap();
        doc.layers[i].set_opacity(0.5).unwrap();
        doc.layers[i].blend_mode = BlendMode::Multiply;
        doc.layers[i].offset = Point::new(3, -2);
        doc.layers[i].visible = false;
        doc.set_active_layer(0).unwrap();

        let path = temp_path("rly");
        save_project(&doc, &path).unwrap();
        let loaded = load_project(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.width(), 32);
        assert_eq!(loaded.height(), 24);
        assert_eq!(loaded.layer_count(), 2);
        assert_eq!(loaded.active_layer_index, Some(0));

        let layer = &loaded.layers[1];
        assert_eq!(layer.name(), "Ink");
        assert_eq!(layer.opacity(), 0.5);
        assert_eq!(layer.blend_mode, BlendMode::Multiply);
        assert_eq!(layer.offset, Point::new(3, -2));
        assert!(!layer.visible);
        assert_eq!(layer.pixels.get(5, 6).unwrap(), Rgba([1, 2, 3, 4]));
        assert_eq!(loaded.layers[0].name(), "Background");
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let path = temp_path("rly");
        std::fs::write(&path, b"this is definitely not a project").unwrap();
        let err = load_project(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, FileError::Corrupt(_)), "got {:?}", err);
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let path = temp_path("rly");
        std::fs::write(&path, b"RLY1").unwrap();
        let err = load_project(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, FileError::Corrupt(_)));
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = load_image(Path::new("/nowhere/image.xyz")).unwrap_err();
        assert!(matches!(err, FileError::Unsupported(_)));
    }

    #[test]
    fn missing_file_is_io() {
        let err = load_image(Path::new("/nowhere/missing.png")).unwrap_err();
        assert!(matches!(err, FileError::Io(_)));
    }

    #[test]
    fn export_png_and_reload() {
        let doc = CanvasState::new(4, 4); // opaque white background
        let path = temp_path("png");
        export(&doc, &path, SaveFormat::Png, 90, TiffCompression::None).unwrap();

        let loaded = load_image(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.layer_count(), 1);
        assert_eq!(loaded.width(), 4);
        assert_eq!(
            loaded.layers[0].pixels.get(2, 2).unwrap(),
            Rgba([255, 255, 255, 255])
        );
    }

    #[test]
    fn save_format_extension_mapping() {
        assert_eq!(SaveFormat::from_extension("PNG"), Some(SaveFormat::Png));
        assert_eq!(SaveFormat::from_extension("jpeg"), Some(SaveFormat::Jpeg));
        assert_eq!(SaveFormat::from_extension("tif"), Some(SaveFormat::Tiff));
        assert_eq!(SaveFormat::from_extension("rly"), Some(SaveFormat::Rly));
        assert_eq!(SaveFormat::from_extension("webp"), None);
    }
}
