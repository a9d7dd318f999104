//! Transform configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! the base layer; a user file overrides only the keys it names.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [router]
//! magick_param = "magick"          # Query key carrying the encoded command
//! signature_param = "magickSig"    # Query key carrying the signature (logged only)
//! content_types = ["image/"]       # Attach only to these response types (empty = any)
//! max_body_bytes = 33554432        # Skip bodies whose Content-Length is larger (0 = no limit)
//!
//! [transform]
//! on_fault = "passthrough"         # "passthrough" or "fail"
//!
//! [engine]
//! default_quality = 90             # Encoder quality when -quality is absent (1-100)
//! max_dimension = 8192             # Largest edge any operation may produce
//! max_sigma = 50.0                 # Largest -blur/-sharpen sigma
//! allowed_commands = ["convert", "magick"]
//!
//! [processing]
//! max_workers = 4                  # Engine worker threads (omit for auto = CPU cores)
//!
//! [logging]
//! filter = "info"                  # tracing EnvFilter directive; RUST_LOG wins
//! format = "full"                  # "full" or "compact"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::engine::EngineConfig;
use crate::transform::FaultPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `config.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    /// When to attach a transform to a response.
    pub router: RouterConfig,
    /// What a transform does when the engine faults.
    pub transform: TransformSection,
    /// Engine limits and defaults.
    pub engine: EngineConfig,
    /// Worker pool sizing.
    pub processing: ProcessingConfig,
    /// Log filter and format.
    pub logging: LoggingConfig,
}

impl TransformConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router.magick_param.is_empty() {
            return Err(ConfigError::Validation(
                "router.magick_param must not be empty".into(),
            ));
        }
        if self.router.magick_param == self.router.signature_param {
            return Err(ConfigError::Validation(
                "router.magick_param and router.signature_param must differ".into(),
            ));
        }
        if !(1..=100).contains(&self.engine.default_quality) {
            return Err(ConfigError::Validation(
                "engine.default_quality must be 1-100".into(),
            ));
        }
        if self.engine.max_dimension == 0 {
            return Err(ConfigError::Validation(
                "engine.max_dimension must be non-zero".into(),
            ));
        }
        if !(self.engine.max_sigma.is_finite() && self.engine.max_sigma > 0.0) {
            return Err(ConfigError::Validation(
                "engine.max_sigma must be a positive number".into(),
            ));
        }
        if self.engine.allowed_commands.is_empty() {
            return Err(ConfigError::Validation(
                "engine.allowed_commands must not be empty".into(),
            ));
        }
        if self.processing.max_workers == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Attachment rules for the response hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    /// Query key whose first non-empty value is the encoded command line.
    pub magick_param: String,
    /// Query key for the request signature. Parsed and logged, never verified.
    pub signature_param: String,
    /// `Content-Type` substrings eligible for transformation. Empty matches any.
    pub content_types: Vec<String>,
    /// Largest declared `Content-Length` to buffer. `0` disables the check.
    ///
    /// Only a declared length is gated. A response without `Content-Length`
    /// (chunked) is attached and buffered in full, so hosts that need a hard
    /// ceiling must enforce it on the upstream body.
    pub max_body_bytes: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            magick_param: "magick".to_string(),
            signature_param: "magickSig".to_string(),
            content_types: vec!["image/".to_string()],
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformSection {
    pub on_fault: FaultPolicy,
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of engine worker threads.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_workers: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_workers.map(|n| n.min(cores)).unwrap_or(cores)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive. `RUST_LOG` takes precedence.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Full,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(TransformConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<TransformConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: TransformConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the TOML file at `path`.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result. A missing file is an error; callers without a
/// file use [`TransformConfig::default`].
pub fn load_config(path: &Path) -> Result<TransformConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let overlay: toml::Value = toml::from_str(&content)?;
    resolve_config(stock_defaults_value()?, Some(overlay))
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# magick-transform Configuration
# ==============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Routing: which responses get a transform attached
# ---------------------------------------------------------------------------
[router]
# Query key whose value is the URL-safe base64 command line.
magick_param = "magick"

# Query key carrying a request signature. It is logged, never verified.
signature_param = "magickSig"

# Response Content-Type substrings eligible for transformation.
# An empty list attaches to any content type.
content_types = ["image/"]

# Skip responses whose Content-Length exceeds this many bytes (0 = no limit).
# Responses without a Content-Length are always buffered in full.
max_body_bytes = 33554432

# ---------------------------------------------------------------------------
# Transform behaviour
# ---------------------------------------------------------------------------
[transform]
# What to emit when the engine reports a fault:
#   "passthrough" - the original body, unchanged
#   "fail"        - nothing; the host answers with an error
on_fault = "passthrough"

# ---------------------------------------------------------------------------
# Engine
# ---------------------------------------------------------------------------
[engine]
# Encoder quality when the command has no -quality (1 = worst, 100 = best).
default_quality = 90

# Largest width or height any operation may produce.
max_dimension = 8192

# Largest -blur/-sharpen sigma. Filter cost grows with sigma regardless of
# image size, so keep this modest.
max_sigma = 50.0

# Accepted command names (argv[0]).
allowed_commands = ["convert", "magick"]

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Engine worker threads.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_workers = 4

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
[logging]
# tracing filter directive, e.g. "info" or "magick_transform=debug".
# The RUST_LOG environment variable overrides this.
filter = "info"

# "full" or "compact".
format = "full"
"##
}
