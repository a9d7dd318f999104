//! Geometry arguments and the dimension math behind them.
//!
//! Parsing is separate from the arithmetic so every function that computes
//! dimensions is pure and unit testable without touching pixels.
//!
//! ## Syntax
//!
//! ```text
//! 800        width 800, height keeps aspect
//! x600       height 600, width keeps aspect
//! 800x600    fit within 800x600
//! 50%        scale both edges to 50%
//! 50%x25%    scale width to 50%, height to 25%
//! 800x600!   exactly 800x600, aspect ignored
//! 800x600^   cover 800x600 (one edge matches, the other may exceed)
//! 800x600>   only shrink images larger than 800x600
//! 800x600<   only enlarge images smaller than 800x600
//! 100x50+10+20  region with offsets (for -crop)
//! ```

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GeometryError {
    #[error("invalid geometry `{0}`")]
    Invalid(String),
    #[error("geometry `{0}` has a zero dimension")]
    Zero(String),
}

/// How a geometry relates to the source dimensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fit {
    /// Largest size that fits inside, aspect preserved.
    #[default]
    Within,
    /// Exact size, aspect ignored (`!`).
    Exact,
    /// Smallest size that covers, aspect preserved (`^`).
    Fill,
    /// Like `Within`, but never enlarges (`>`).
    ShrinkOnly,
    /// Like `Within`, but never shrinks (`<`).
    EnlargeOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Geometry {
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub percent: bool,
    pub fit: Fit,
    pub x: i64,
    pub y: i64,
}

fn number(text: &str, original: &str) -> Result<Option<f64>, GeometryError> {
    if text.is_empty() {
        return Ok(None);
    }
    let value: f64 = text
        .parse()
        .map_err(|_| GeometryError::Invalid(original.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(GeometryError::Invalid(original.to_string()));
    }
    if value == 0.0 {
        return Err(GeometryError::Zero(original.to_string()));
    }
    Ok(Some(value))
}

fn offsets(text: &str, original: &str) -> Result<(i64, i64), GeometryError> {
    if text.is_empty() {
        return Ok((0, 0));
    }
    let invalid = || GeometryError::Invalid(original.to_string());
    // Split "+10-20" into "+10", "-20".
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices().skip(1) {
        if c == '+' || c == '-' {
            parts.push(&text[start..i]);
            start = i;
        }
    }
    parts.push(&text[start..]);
    match parts.as_slice() {
        [x, y] => Ok((
            x.parse().map_err(|_| invalid())?,
            y.parse().map_err(|_| invalid())?,
        )),
        _ => Err(invalid()),
    }
}

/// Parse a geometry argument.
pub fn parse_geometry(text: &str) -> Result<Geometry, GeometryError> {
    let mut geometry = Geometry::default();
    let mut core = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '!' => geometry.fit = Fit::Exact,
            '^' => geometry.fit = Fit::Fill,
            '>' => geometry.fit = Fit::ShrinkOnly,
            '<' => geometry.fit = Fit::EnlargeOnly,
            '%' => geometry.percent = true,
            _ => core.push(c),
        }
    }

    let (size, offset) = match core.find(['+', '-']) {
        Some(i) => core.split_at(i),
        None => (core.as_str(), ""),
    };
    (geometry.x, geometry.y) = offsets(offset, text)?;

    let (width, height) = match size.split_once(['x', 'X']) {
        Some((w, h)) => (number(w, text)?, number(h, text)?),
        None => (number(size, text)?, None),
    };
    if width.is_none() && height.is_none() {
        return Err(GeometryError::Invalid(text.to_string()));
    }
    geometry.width = width;
    geometry.height = height;
    Ok(geometry)
}

fn scaled(edge: u32, factor: f64) -> u32 {
    ((edge as f64 * factor).round() as u32).max(1)
}

/// Dimensions that cover `target` while keeping the source aspect ratio.
///
/// One dimension matches the target exactly, the other may exceed it.
pub fn calculate_fill_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        // Source is wider: height will match, width will exceed
        let h = tgt_h;
        let w = (h as f64 * src_aspect).round() as u32;
        (w.max(1), h)
    } else {
        // Source is taller: width will match, height will exceed
        let w = tgt_w;
        let h = (w as f64 / src_aspect).round() as u32;
        (w, h.max(1))
    }
}

/// Largest dimensions inside `target` keeping the source aspect ratio.
/// A missing target edge is unconstrained.
pub fn calculate_within_dimensions(
    source: (u32, u32),
    target: (Option<u32>, Option<u32>),
) -> (u32, u32) {
    let (src_w, src_h) = source;
    let ratio_w = target.0.map_or(f64::INFINITY, |w| w as f64 / src_w as f64);
    let ratio_h = target.1.map_or(f64::INFINITY, |h| h as f64 / src_h as f64);
    let ratio = ratio_w.min(ratio_h);
    (scaled(src_w, ratio), scaled(src_h, ratio))
}

/// Resolve `geometry` against an image of `source` dimensions.
pub fn resolve(source: (u32, u32), geometry: &Geometry) -> (u32, u32) {
    let (src_w, src_h) = source;

    if geometry.percent {
        let fx = geometry.width.or(geometry.height).unwrap_or(100.0) / 100.0;
        let fy = geometry.height.or(geometry.width).unwrap_or(100.0) / 100.0;
        return (scaled(src_w, fx), scaled(src_h, fy));
    }

    let w = geometry.width.map(|w| w.round() as u32);
    let h = geometry.height.map(|h| h.round() as u32);
    let fits = w.is_none_or(|w| src_w <= w) && h.is_none_or(|h| src_h <= h);

    match (geometry.fit, w, h) {
        (Fit::Exact, Some(w), Some(h)) => (w, h),
        (Fit::Fill, Some(w), Some(h)) => calculate_fill_dimensions(source, (w, h)),
        (Fit::ShrinkOnly, ..) if fits => source,
        (Fit::EnlargeOnly, ..) if !fits => source,
        _ => calculate_within_dimensions(source, (w, h)),
    }
}

/// Offset that centers an `inner` edge inside an `outer` edge.
///
/// Negative when `inner` is larger than `outer`.
pub fn centered_offset(outer: u32, inner: u32) -> i64 {
    (outer as i64 - inner as i64) / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // parse_geometry tests
    // =========================================================================

    #[test]
    fn parse_width_and_height() {
        let g = parse_geometry("800x600").unwrap();
        assert_eq!(g.width, Some(800.0));
        assert_eq!(g.height, Some(600.0));
        assert_eq!(g.fit, Fit::Within);
        assert!(!g.percent);
    }

    #[test]
    fn parse_width_only_and_height_only() {
        let g = parse_geometry("800").unwrap();
        assert_eq!((g.width, g.height), (Some(800.0), None));
        let g = parse_geometry("x600").unwrap();
        assert_eq!((g.width, g.height), (None, Some(600.0)));
    }

    #[test]
    fn parse_percent_and_flags() {
        let g = parse_geometry("50%").unwrap();
        assert!(g.percent);
        assert_eq!(g.width, Some(50.0));
        assert_eq!(parse_geometry("10x10!").unwrap().fit, Fit::Exact);
        assert_eq!(parse_geometry("10x10^").unwrap().fit, Fit::Fill);
        assert_eq!(parse_geometry("10x10>").unwrap().fit, Fit::ShrinkOnly);
        assert_eq!(parse_geometry("10x10<").unwrap().fit, Fit::EnlargeOnly);
    }

    #[test]
    fn parse_offsets() {
        let g = parse_geometry("100x50+10+20").unwrap();
        assert_eq!((g.x, g.y), (10, 20));
        let g = parse_geometry("100x50-5+3").unwrap();
        assert_eq!((g.x, g.y), (-5, 3));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(parse_geometry("abc"), Err(GeometryError::Invalid(_))));
        assert!(matches!(parse_geometry(""), Err(GeometryError::Invalid(_))));
        assert!(matches!(parse_geometry("x"), Err(GeometryError::Invalid(_))));
        assert!(matches!(parse_geometry("10x10+5"), Err(GeometryError::Invalid(_))));
        assert!(matches!(parse_geometry("0x10"), Err(GeometryError::Zero(_))));
    }

    // =========================================================================
    // resolve tests
    // =========================================================================

    #[test]
    fn resolve_percent() {
        let g = parse_geometry("50%").unwrap();
        assert_eq!(resolve((800, 600), &g), (400, 300));
        let g = parse_geometry("50%x25%").unwrap();
        assert_eq!(resolve((800, 600), &g), (400, 150));
    }

    #[test]
    fn resolve_within_landscape() {
        // 2000x1500 into 1000x1000 → width-bound
        let g = parse_geometry("1000x1000").unwrap();
        assert_eq!(resolve((2000, 1500), &g), (1000, 750));
    }

    #[test]
    fn resolve_within_portrait() {
        let g = parse_geometry("1000x1000").unwrap();
        assert_eq!(resolve((1500, 2000), &g), (750, 1000));
    }

    #[test]
    fn resolve_width_only_enlarges() {
        let g = parse_geometry("1000").unwrap();
        assert_eq!(resolve((500, 400), &g), (1000, 800));
    }

    #[test]
    fn resolve_exact_ignores_aspect() {
        let g = parse_geometry("300x300!").unwrap();
        assert_eq!(resolve((800, 600), &g), (300, 300));
    }

    #[test]
    fn resolve_fill_covers_target() {
        let g = parse_geometry("400x500^").unwrap();
        assert_eq!(resolve((800, 600), &g), (667, 500));
    }

    #[test]
    fn resolve_shrink_only_keeps_small_images() {
        let g = parse_geometry("1000x1000>").unwrap();
        assert_eq!(resolve((500, 400), &g), (500, 400));
        assert_eq!(resolve((2000, 1000), &g), (1000, 500));
    }

    #[test]
    fn resolve_enlarge_only_keeps_large_images() {
        let g = parse_geometry("1000x1000<").unwrap();
        assert_eq!(resolve((2000, 1000), &g), (2000, 1000));
        assert_eq!(resolve((500, 250), &g), (1000, 500));
    }

    #[test]
    fn resolve_never_collapses_to_zero() {
        let g = parse_geometry("1%").unwrap();
        assert_eq!(resolve((10, 10), &g), (1, 1));
    }

    // =========================================================================
    // calculate_fill_dimensions tests
    // =========================================================================

    #[test]
    fn fill_wider_source_to_portrait_target() {
        // Source is wider, so height matches: 500, width = 500 * (4/3) = 667
        assert_eq!(calculate_fill_dimensions((800, 600), (400, 500)), (667, 500));
    }

    #[test]
    fn fill_taller_source_to_landscape_target() {
        assert_eq!(calculate_fill_dimensions((600, 800), (500, 400)), (500, 667));
    }

    #[test]
    fn fill_same_aspect_ratio() {
        assert_eq!(calculate_fill_dimensions((800, 600), (400, 300)), (400, 300));
    }

    #[test]
    fn centered_offsets() {
        assert_eq!(centered_offset(100, 50), 25);
        assert_eq!(centered_offset(50, 100), -25);
    }
}
