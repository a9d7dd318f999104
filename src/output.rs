//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Query
//!
//! ```text
//! Query
//!     magick: "Y29udmVydCAtIC1mbGlwIC0-"
//!     magickSig: "abc"
//!     debug: (no values)
//!
//! Arguments (4)
//!     000 convert
//!     001 -
//!     002 -flip
//!     003 -
//! ```
//!
//! ## Transform
//!
//! ```text
//! Routing: attached
//! Transformed: 48213 bytes → 9120 bytes (image/webp)
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>` or `String`)
//! for testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::arguments::ArgumentVector;
use crate::query::QueryMap;
use crate::router::{Routing, SkipReason};
use crate::transform::Outcome;
use serde_json::json;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 0-based argv index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Quote a value, truncating long ones to `max` characters.
fn quoted(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((cut, _)) => format!("\"{}...\"", &value[..cut]),
        None => format!("\"{value}\""),
    }
}

// ============================================================================
// Query
// ============================================================================

/// Every key with its values, in first-seen order.
///
/// ```text
/// Query
///     a: "1", "2"
///     flag: (no values)
/// ```
pub fn format_query_map(map: &QueryMap) -> Vec<String> {
    let mut lines = vec!["Query".to_string()];
    if map.is_empty() {
        lines.push(format!("{}(empty)", indent(1)));
        return lines;
    }
    for (key, values) in map.iter() {
        let rendered = if values.is_empty() {
            "(no values)".to_string()
        } else {
            values
                .iter()
                .map(|v| quoted(v, 60))
                .collect::<Vec<_>>()
                .join(", ")
        };
        lines.push(format!("{}{}: {}", indent(1), key, rendered));
    }
    lines
}

/// Decoded argv, one token per line.
pub fn format_arguments(arguments: &ArgumentVector<'_>) -> Vec<String> {
    let mut lines = vec![format!("Arguments ({})", arguments.len())];
    for (i, token) in arguments.iter().enumerate() {
        lines.push(format!("{}{} {}", indent(1), format_index(i), token));
    }
    lines
}

/// Machine-readable form of the `query` command output.
pub fn query_json(
    map: &QueryMap,
    arguments: Option<&ArgumentVector<'_>>,
    error: Option<&str>,
) -> serde_json::Value {
    let params: serde_json::Map<String, serde_json::Value> = map
        .iter()
        .map(|(key, values)| (key.to_string(), json!(values.to_vec())))
        .collect();
    json!({
        "params": params,
        "arguments": arguments.map(|a| a.to_vec()),
        "error": error,
    })
}

pub fn print_query_output(map: &QueryMap, arguments: Option<&ArgumentVector<'_>>) {
    for line in format_query_map(map) {
        println!("{}", line);
    }
    if let Some(arguments) = arguments {
        println!();
        for line in format_arguments(arguments) {
            println!("{}", line);
        }
    }
}

// ============================================================================
// Transform
// ============================================================================

pub fn format_routing(routing: Routing) -> String {
    let reason = match routing {
        Routing::Attached => return "Routing: attached".to_string(),
        Routing::Skipped(SkipReason::NoArguments) => "no magick parameter",
        Routing::Skipped(SkipReason::ContentType) => "content type not eligible",
        Routing::Skipped(SkipReason::TooLarge) => "body too large",
        Routing::Skipped(SkipReason::Decode) => "magick parameter did not decode",
    };
    format!("Routing: skipped ({reason})")
}

pub fn format_outcome(outcome: &Outcome, input_len: usize) -> Vec<String> {
    match outcome {
        Outcome::Transformed { media_type, length } => vec![format!(
            "Transformed: {} bytes → {} bytes ({})",
            input_len,
            length,
            media_type.unwrap_or("unknown type")
        )],
        Outcome::Passthrough { error } => vec![
            format!("Passthrough: {} bytes unchanged", input_len),
            format!("{}Reason: {}", indent(1), error),
        ],
        Outcome::Failed { error } => vec![
            "Failed: no output".to_string(),
            format!("{}Reason: {}", indent(1), error),
        ],
    }
}

pub fn print_transform_output(routing: Routing, outcome: Option<&Outcome>, input_len: usize) {
    println!("{}", format_routing(routing));
    if let Some(outcome) = outcome {
        for line in format_outcome(outcome, input_len) {
            println!("{}", line);
        }
    }
}
