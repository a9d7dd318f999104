//! Pure Rust engine built on the `image` crate.
//!
//! Everything is statically linked into the binary; there is no native image
//! library to initialize.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::load_from_memory_with_format` after `guess_format` |
//! | `-resize` | `DynamicImage::resize_exact` with `Lanczos3` |
//! | `-thumbnail` | `DynamicImage::resize_exact` with `Triangle` |
//! | `-extent` | `imageops::overlay` onto a fresh canvas |
//! | `-crop` | `DynamicImage::crop_imm` |
//! | `-blur` / `-sharpen` | `DynamicImage::blur` / `DynamicImage::unsharpen` |
//! | Encode → JPEG | `codecs::jpeg::JpegEncoder` with quality |
//! | Encode → WebP | `codecs::webp::WebPEncoder` (lossless) |
//! | Encode → AVIF | `codecs::avif::AvifEncoder` (rav1e, speed 6) |
//! | Encode → PNG, TIFF | `DynamicImage::write_to` |
//!
//! AVIF is output only: the `image` crate's `"avif"` feature enables the
//! encoder, not a decoder.

use super::backend::{
    Engine, EngineError, ExceptionContext, ExceptionInfo, ImageContext, Severity,
};
use super::command::{Command, Operation, parse_command};
use super::geometry::{Geometry, centered_offset, resolve};
use super::params::{Quality, can_encode, output_format};
use crate::arguments::ArgumentVector;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Decoders compiled in, for the genesis log line.
const INPUT_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Tiff,
    ImageFormat::WebP,
];

/// Engine settings (`[engine]` in the config file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Encoder quality when the command does not set `-quality` (1-100).
    pub default_quality: u32,
    /// Largest width or height any operation may produce.
    pub max_dimension: u32,
    /// Largest `-blur`/`-sharpen` sigma. Kernel cost grows with sigma, not
    /// with image size.
    pub max_sigma: f32,
    /// Accepted values for `argv[0]`.
    pub allowed_commands: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_quality: 90,
            max_dimension: 8192,
            max_sigma: 50.0,
            allowed_commands: vec!["convert".to_string(), "magick".to_string()],
        }
    }
}

/// Per-command options context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageInfo {
    pub quality: Option<Quality>,
    pub format: Option<ImageFormat>,
}

/// Working image list for one request.
#[derive(Debug, Default)]
pub struct Wand {
    frames: Vec<DynamicImage>,
    cursor: usize,
    source_format: Option<ImageFormat>,
    format: Option<ImageFormat>,
    quality: Quality,
}

impl Wand {
    /// Format [`combined_blob`](ImageContext::combined_blob) will encode to.
    pub fn output_format(&self) -> Option<ImageFormat> {
        self.format.or(self.source_format)
    }
}

fn decode_error(e: image::ImageError) -> EngineError {
    EngineError::fault(format!("decode failed: {e}"))
}

fn encode_error(format: ImageFormat, e: image::ImageError) -> EngineError {
    EngineError::fault(format!("{format:?} encode failed: {e}"))
}

fn encode(
    frame: &DynamicImage,
    format: ImageFormat,
    quality: Quality,
) -> Result<Vec<u8>, EngineError> {
    let mut out = Vec::new();
    let (w, h) = (frame.width(), frame.height());
    let q = quality.value() as u8;
    let result = match format {
        ImageFormat::Jpeg => {
            let rgb = frame.to_rgb8();
            JpegEncoder::new_with_quality(&mut out, q).write_image(
                rgb.as_raw(),
                w,
                h,
                ExtendedColorType::Rgb8,
            )
        }
        ImageFormat::WebP => {
            let rgba = frame.to_rgba8();
            WebPEncoder::new_lossless(&mut out).write_image(
                rgba.as_raw(),
                w,
                h,
                ExtendedColorType::Rgba8,
            )
        }
        ImageFormat::Avif => {
            frame.write_with_encoder(AvifEncoder::new_with_speed_quality(&mut out, 6, q))
        }
        other => frame.write_to(&mut Cursor::new(&mut out), other),
    };
    result.map_err(|e| encode_error(format, e))?;
    Ok(out)
}

impl ImageContext for Wand {
    fn read_from_bytes(&mut self, blob: &[u8]) -> Result<(), EngineError> {
        let format = image::guess_format(blob).map_err(decode_error)?;
        let img = image::load_from_memory_with_format(blob, format).map_err(decode_error)?;
        self.frames = vec![img];
        self.cursor = 0;
        self.source_format = Some(format);
        Ok(())
    }

    fn write_to(&mut self, target: &str) -> Result<(), EngineError> {
        if target == "-" {
            return Ok(());
        }
        let format = match target.split_once(':') {
            Some((name, "-")) => output_format(name)
                .ok_or_else(|| EngineError::fault(format!("no encoder for `{name}`")))?,
            _ => {
                return Err(EngineError::fault(format!(
                    "output target `{target}` is not permitted"
                )));
            }
        };
        self.format = Some(format);
        Ok(())
    }

    fn reset_iterator(&mut self) {
        self.cursor = 0;
    }

    fn combined_blob(&mut self) -> Result<Vec<u8>, EngineError> {
        let frame = self
            .frames
            .get(self.cursor)
            .ok_or_else(|| EngineError::fault("no image to encode"))?;
        let format = self
            .output_format()
            .ok_or_else(|| EngineError::fault("output format unknown"))?;
        if !can_encode(format) {
            return Err(EngineError::fault(format!("no encoder for {format:?}")));
        }
        encode(frame, format, self.quality)
    }

    fn media_type(&self) -> Option<&'static str> {
        self.output_format().map(|format| format.to_mime_type())
    }
}

/// Pure Rust engine using the `image` crate ecosystem.
///
/// Counts live handles so [`terminus`](Engine::terminus) can report leaks.
pub struct RustEngine {
    config: EngineConfig,
    live: AtomicUsize,
}

impl RustEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            live: AtomicUsize::new(0),
        }
    }

    /// Handles acquired and not yet released.
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn track<T>(&self, handle: T) -> Option<T> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Some(handle)
    }

    fn untrack(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    fn bounded(&self, (w, h): (u32, u32)) -> Result<(u32, u32), EngineError> {
        let max = self.config.max_dimension;
        if w > max || h > max {
            return Err(EngineError::fault(format!(
                "{w}x{h} exceeds the {max}px limit"
            )));
        }
        Ok((w, h))
    }

    fn extent_size(&self, source: (u32, u32), geometry: &Geometry) -> (u32, u32) {
        if geometry.percent {
            return resolve(source, geometry);
        }
        (
            geometry.width.map_or(source.0, |w| w.round() as u32),
            geometry.height.map_or(source.1, |h| h.round() as u32),
        )
    }

    fn apply(
        &self,
        img: DynamicImage,
        operation: &Operation,
    ) -> Result<DynamicImage, EngineError> {
        let source = (img.width(), img.height());
        Ok(match operation {
            Operation::Resize(geometry) => {
                let (w, h) = self.bounded(resolve(source, geometry))?;
                img.resize_exact(w, h, FilterType::Lanczos3)
            }
            Operation::Thumbnail(geometry) => {
                let (w, h) = self.bounded(resolve(source, geometry))?;
                img.resize_exact(w, h, FilterType::Triangle)
            }
            Operation::Extent(geometry) => {
                let (w, h) = self.bounded(self.extent_size(source, geometry))?;
                let mut canvas = DynamicImage::new(w, h, img.color());
                image::imageops::overlay(
                    &mut canvas,
                    &img,
                    centered_offset(w, source.0),
                    centered_offset(h, source.1),
                );
                canvas
            }
            Operation::Crop(geometry) => {
                let (w, h) = self.extent_size(source, geometry);
                let (x, y) = (geometry.x, geometry.y);
                if x < 0 || y < 0 || x >= source.0 as i64 || y >= source.1 as i64 {
                    return Err(EngineError::fault("crop region lies outside the image"));
                }
                img.crop_imm(x as u32, y as u32, w, h)
            }
            Operation::Rotate(90) => img.rotate90(),
            Operation::Rotate(180) => img.rotate180(),
            Operation::Rotate(270) => img.rotate270(),
            Operation::Rotate(_) => img,
            Operation::Blur(sigma) => img.blur(sigma.0),
            Operation::Sharpen(sigma) => img.unsharpen(sigma.0, 0),
            Operation::Flip => img.flipv(),
            Operation::Flop => img.fliph(),
            Operation::Negate => {
                let mut img = img;
                img.invert();
                img
            }
            Operation::Grayscale => img.grayscale(),
        })
    }

    fn run(
        &self,
        command: &Command,
        options: &mut ImageInfo,
        image: &mut Wand,
    ) -> Result<(), EngineError> {
        if let Some(quality) = command.quality {
            options.quality = Some(quality);
        }
        if let Some(format) = command.format {
            options.format = Some(format);
        }

        let frames = std::mem::take(&mut image.frames);
        let mut processed = Vec::with_capacity(frames.len());
        for frame in frames {
            let mut frame = frame;
            for operation in &command.operations {
                frame = self.apply(frame, operation)?;
            }
            processed.push(frame);
        }
        image.frames = processed;

        if let Some(quality) = options.quality {
            image.quality = quality;
        }
        if let Some(format) = options.format {
            image.format = Some(format);
        }
        if let Some(target) = &command.target {
            image.write_to(target)?;
        }
        Ok(())
    }
}

impl Default for RustEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine for RustEngine {
    type Exception = ExceptionInfo;
    type Options = ImageInfo;
    type Image = Wand;

    fn genesis(&self) -> Result<(), EngineError> {
        let formats: Vec<&str> = INPUT_FORMATS.iter().map(|f| f.to_mime_type()).collect();
        tracing::info!(
            inputs = ?formats,
            max_dimension = self.config.max_dimension,
            "rust engine ready"
        );
        Ok(())
    }

    fn terminus(&self) {
        let live = self.live_handles();
        if live > 0 {
            tracing::warn!(live, "engine torn down with handles still live");
        }
    }

    fn acquire_exception(&self) -> Option<ExceptionInfo> {
        self.track(ExceptionInfo::default())
    }

    fn release_exception(&self, _exception: ExceptionInfo) {
        self.untrack();
    }

    fn acquire_options(&self) -> Option<ImageInfo> {
        self.track(ImageInfo::default())
    }

    fn release_options(&self, _options: ImageInfo) {
        self.untrack();
    }

    fn acquire_image(&self) -> Option<Wand> {
        self.track(Wand {
            quality: Quality::new(self.config.default_quality),
            ..Wand::default()
        })
    }

    fn release_image(&self, _image: Wand) {
        self.untrack();
    }

    fn image_command(
        &self,
        options: &mut ImageInfo,
        image: &mut Wand,
        arguments: &ArgumentVector<'_>,
        exception: &mut ExceptionInfo,
    ) -> bool {
        let outcome = parse_command(arguments, &self.config)
            .map_err(|e| EngineError::fault(e.to_string()))
            .and_then(|command| self.run(&command, options, image));
        match outcome {
            Ok(()) => true,
            Err(EngineError::Fault { severity, reason }) => {
                exception.throw(severity, reason);
                false
            }
            Err(other) => {
                exception.throw(Severity::Error, other.to_string());
                false
            }
        }
    }
}
