//! Encoding parameters shared by the command interpreter and the engine.
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`Sigma`]: Gaussian radius/sigma pair from `-blur` and `-sharpen`.
//! - [`output_format`]: Format names accepted by `-format` and `FMT:-` targets.

use image::ImageFormat;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Blur/sharpen strength, written `RADIUSxSIGMA` or just `SIGMA`.
///
/// The radius is accepted for compatibility and ignored; the kernel size is
/// derived from sigma.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sigma(pub f32);

impl Sigma {
    pub fn parse(text: &str) -> Option<Self> {
        let sigma = match text.split_once(['x', 'X']) {
            Some((_, sigma)) => sigma,
            None => text,
        };
        let value: f32 = sigma.parse().ok()?;
        (value.is_finite() && value > 0.0).then_some(Self(value))
    }
}

/// Output formats with an encoder compiled in.
const OUTPUT_FORMATS: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
    ("avif", ImageFormat::Avif),
];

/// Look up an output format by name, case-insensitively.
pub fn output_format(name: &str) -> Option<ImageFormat> {
    OUTPUT_FORMATS
        .iter()
        .find(|(ext, _)| ext.eq_ignore_ascii_case(name))
        .map(|(_, format)| *format)
}

/// Whether we can encode `format`.
pub fn can_encode(format: ImageFormat) -> bool {
    OUTPUT_FORMATS.iter().any(|(_, f)| *f == format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_90() {
        assert_eq!(Quality::default().value(), 90);
    }

    #[test]
    fn sigma_forms() {
        assert_eq!(Sigma::parse("1.5"), Some(Sigma(1.5)));
        assert_eq!(Sigma::parse("0x2"), Some(Sigma(2.0)));
        assert_eq!(Sigma::parse("0"), None);
        assert_eq!(Sigma::parse("soft"), None);
    }

    #[test]
    fn output_format_lookup() {
        assert_eq!(output_format("WEBP"), Some(ImageFormat::WebP));
        assert_eq!(output_format("jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(output_format("gif"), None);
        assert!(can_encode(ImageFormat::Avif));
        assert!(!can_encode(ImageFormat::Gif));
    }
}
