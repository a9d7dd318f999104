//! Shared test utilities for the magick-transform test suite.
//!
//! Provides synthetic image fixtures and small helpers for building argument
//! tokens and driving a transform to completion.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let body = png_bytes(64, 48);
//! let token = magick_token("convert - -resize 50% -");
//! let query = format!("magick={token}");
//! ```

use crate::arguments::encode;
use crate::transform::{ChannelSink, Outcome, SinkEvent};
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::sync::mpsc::Receiver;
use std::time::Duration;

// =========================================================================
// Image fixtures
// =========================================================================

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }))
}

/// Encode a `width`x`height` gradient in `format`.
pub fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut out = Vec::new();
    gradient(width, height)
        .write_to(&mut Cursor::new(&mut out), format)
        .unwrap();
    out
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    image_bytes(width, height, ImageFormat::Png)
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    image_bytes(width, height, ImageFormat::Jpeg)
}

/// Decode `bytes` and return its format and dimensions.
pub fn inspect(bytes: &[u8]) -> (ImageFormat, u32, u32) {
    let format = image::guess_format(bytes).unwrap();
    let img = image::load_from_memory_with_format(bytes, format).unwrap();
    (format, img.width(), img.height())
}

// =========================================================================
// Arguments
// =========================================================================

/// The `magick` query value for a space-separated command line.
pub fn magick_token(line: &str) -> String {
    let args: Vec<&str> = line.split(' ').collect();
    encode(&args)
}

// =========================================================================
// Sink draining
// =========================================================================

/// Collect every chunk and the final outcome from a [`ChannelSink`].
pub fn drain(events: &Receiver<SinkEvent>) -> (Vec<Bytes>, Outcome) {
    let mut chunks = Vec::new();
    loop {
        match events.recv_timeout(Duration::from_secs(30)).unwrap() {
            SinkEvent::Chunk(chunk) => chunks.push(chunk),
            SinkEvent::Complete(outcome) => return (chunks, outcome),
        }
    }
}

/// A fresh channel sink and its receiver.
pub fn channel_sink() -> (ChannelSink, Receiver<SinkEvent>) {
    ChannelSink::new()
}
