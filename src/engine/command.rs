//! Command-line interpretation for [`RustEngine`](super::rust_engine::RustEngine).
//!
//! Turns an argument vector such as
//! `convert - -resize 50% -quality 80 webp:-` into a [`Command`]: an ordered
//! list of pixel [`Operation`]s plus encoder settings and an optional output
//! target. Nothing here touches pixels, so parsing is tested on its own.
//!
//! Bare (non-option) tokens follow the `convert INPUT ... OUTPUT` shape:
//! `-` stands for the buffered body, and the final bare token names the
//! output target. Any other input name is rejected; the engine only ever
//! sees the body it was handed.

use super::geometry::{Geometry, GeometryError, parse_geometry};
use super::params::{Quality, Sigma, output_format};
use super::rust_engine::EngineConfig;
use crate::arguments::ArgumentVector;
use image::ImageFormat;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command line")]
    Empty,
    #[error("unrecognized command `{0}`")]
    UnknownCommand(String),
    #[error("unrecognized option `{0}`")]
    UnknownOption(String),
    #[error("option `{0}` requires an argument")]
    MissingArgument(&'static str),
    #[error("invalid argument `{value}` for `{option}`")]
    InvalidArgument { option: &'static str, value: String },
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("file input `{0}` is not permitted")]
    FileInput(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Resize(Geometry),
    Thumbnail(Geometry),
    Extent(Geometry),
    Crop(Geometry),
    /// Clockwise quarter turns: 0, 90, 180 or 270.
    Rotate(u32),
    Blur(Sigma),
    Sharpen(Sigma),
    Flip,
    Flop,
    Negate,
    Grayscale,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    pub operations: Vec<Operation>,
    pub quality: Option<Quality>,
    pub format: Option<ImageFormat>,
    pub target: Option<String>,
}

fn rotation(value: &str) -> Option<u32> {
    let degrees: i64 = value.parse().ok()?;
    let normalized = degrees.rem_euclid(360);
    (normalized % 90 == 0).then_some(normalized as u32)
}

/// Parse `arguments`; `argv[0]` must be one of `config.allowed_commands`.
pub fn parse_command(
    arguments: &ArgumentVector<'_>,
    config: &EngineConfig,
) -> Result<Command, CommandError> {
    let tokens = arguments.to_vec();
    let (name, rest) = tokens.split_first().ok_or(CommandError::Empty)?;
    if !config.allowed_commands.iter().any(|c| c == name) {
        return Err(CommandError::UnknownCommand(name.to_string()));
    }

    let mut command = Command::default();
    let mut seen_input = false;
    let mut iter = rest.iter().enumerate();

    while let Some((index, &token)) = iter.next() {
        let is_last = index + 1 == rest.len();

        if token == "-" || !token.starts_with('-') {
            if is_last && (seen_input || token != "-") {
                command.target = Some(token.to_string());
            } else if token == "-" {
                seen_input = true;
            } else {
                return Err(CommandError::FileInput(token.to_string()));
            }
            continue;
        }

        let mut value = |option: &'static str| {
            iter.next()
                .map(|(_, v)| *v)
                .ok_or(CommandError::MissingArgument(option))
        };
        let invalid = |option: &'static str, value: &str| CommandError::InvalidArgument {
            option,
            value: value.to_string(),
        };
        let sigma = |option: &'static str, value: &str| {
            Sigma::parse(value)
                .filter(|s| s.0 <= config.max_sigma)
                .ok_or_else(|| invalid(option, value))
        };

        match token {
            "-resize" => {
                let g = parse_geometry(value("-resize")?)?;
                command.operations.push(Operation::Resize(g));
            }
            "-thumbnail" => {
                let g = parse_geometry(value("-thumbnail")?)?;
                command.operations.push(Operation::Thumbnail(g));
            }
            "-extent" => {
                let g = parse_geometry(value("-extent")?)?;
                command.operations.push(Operation::Extent(g));
            }
            "-crop" => {
                let g = parse_geometry(value("-crop")?)?;
                command.operations.push(Operation::Crop(g));
            }
            "-rotate" => {
                let v = value("-rotate")?;
                let quarter = rotation(v).ok_or_else(|| invalid("-rotate", v))?;
                command.operations.push(Operation::Rotate(quarter));
            }
            "-blur" => {
                let v = value("-blur")?;
                command.operations.push(Operation::Blur(sigma("-blur", v)?));
            }
            "-sharpen" => {
                let v = value("-sharpen")?;
                command.operations.push(Operation::Sharpen(sigma("-sharpen", v)?));
            }
            "-quality" => {
                let v = value("-quality")?;
                let q: u32 = v.parse().map_err(|_| invalid("-quality", v))?;
                command.quality = Some(Quality::new(q));
            }
            "-format" => {
                let v = value("-format")?;
                command.format = Some(output_format(v).ok_or_else(|| invalid("-format", v))?);
            }
            "-colorspace" => {
                let v = value("-colorspace")?;
                match v.to_ascii_lowercase().as_str() {
                    "gray" => command.operations.push(Operation::Grayscale),
                    "srgb" | "rgb" => {}
                    _ => return Err(invalid("-colorspace", v)),
                }
            }
            "-flip" => command.operations.push(Operation::Flip),
            "-flop" => command.operations.push(Operation::Flop),
            "-negate" => command.operations.push(Operation::Negate),
            // Encoders never carry metadata over.
            "-strip" => {}
            other => return Err(CommandError::UnknownOption(other.to_string())),
        }
    }

    Ok(command)
}
