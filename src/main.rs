use clap::{Parser, Subcommand};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Uri};
use magick_transform::arguments::{ArgumentBuffer, encode};
use magick_transform::config::{self, TransformConfig};
use magick_transform::hook::ResponseHook;
use magick_transform::pool::WorkerPool;
use magick_transform::query::QueryMap;
use magick_transform::router::{MagickRouter, Transaction, rewrite_headers};
use magick_transform::transform::{ChannelSink, Outcome, SinkEvent};
use magick_transform::{engine, logging, output};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup; called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "magick-transform")]
#[command(about = "Query-driven image transforms for proxied response bodies")]
#[command(long_about = "\
Query-driven image transforms for proxied response bodies

A proxy hook reads the `magick` query parameter, decodes it into a command
line and runs the buffered response body through an image engine:

  GET /photo.jpg?magick=Y29udmVydCAtIC1yZXNpemUgNTAlIHdlYnA6LQ--

  magick    URL-safe base64 ('.' for '+', '_' for '/', '-' for '=')
            of a space-separated command line
  decoded   convert - -resize 50% webp:-

Supported options: -resize, -thumbnail, -extent, -crop, -rotate, -blur,
-sharpen, -quality, -format, -colorspace, -flip, -flop, -negate, -strip.
'-' is the response body; a final FMT:- selects the output format.

Use 'encode' to build a token, 'query' to inspect one, and 'transform' to run
the full hook pipeline against a file.

Run 'magick-transform gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Path to a config.toml (stock defaults when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a file through the response hook as if it were a proxied body
    Transform {
        /// Request query string, without the leading '?'
        #[arg(long)]
        query: String,
        /// Response Content-Type (guessed from the file when omitted)
        #[arg(long)]
        content_type: Option<String>,
        /// Feed the body to the transform in chunks of this many bytes
        #[arg(long, default_value_t = 16 * 1024)]
        chunk_size: usize,
        /// Input file (the origin's response body)
        input: PathBuf,
        /// Where to write the emitted body
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the `magick` token for a command line
    Encode {
        /// Command line tokens, e.g. convert - -resize 50% webp:-
        #[arg(required = true, allow_hyphen_values = true, trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Parse a query string and decode its `magick` parameter
    Query {
        /// Query string, without the leading '?'
        query: String,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => TransformConfig::default(),
    };

    match cli.command {
        Command::Transform {
            query,
            content_type,
            chunk_size,
            input,
            output,
        } => {
            logging::init_tracing(&config.logging)?;
            run_transform(
                &config,
                &query,
                content_type.as_deref(),
                chunk_size,
                &input,
                &output,
            )?;
        }
        Command::Encode { args } => {
            println!("{}", encode(&args));
        }
        Command::Query { query, json } => {
            let map = QueryMap::parse(query);
            let decoded = map
                .first(&config.router.magick_param)
                .map(|token| ArgumentBuffer::decode(token.as_bytes()));
            let arguments = decoded.as_ref().and_then(|d| d.as_ref().ok());
            let error = decoded
                .as_ref()
                .and_then(|d| d.as_ref().err())
                .map(|e| e.to_string());

            if json {
                let vector = arguments.map(ArgumentBuffer::arguments);
                let value = output::query_json(&map, vector.as_ref(), error.as_deref());
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                let vector = arguments.map(ArgumentBuffer::arguments);
                output::print_query_output(&map, vector.as_ref());
                if let Some(error) = error {
                    println!();
                    println!("Decode error: {}", error);
                }
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Response headers the origin would have sent for `body`.
fn origin_headers(
    body: &[u8],
    content_type: Option<&str>,
) -> Result<HeaderMap, Box<dyn std::error::Error>> {
    let content_type = match content_type {
        Some(ct) => ct.to_string(),
        None => image::guess_format(body)
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|_| "application/octet-stream".to_string()),
    };
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_str(&content_type)?);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    Ok(headers)
}

fn run_transform(
    config: &TransformConfig,
    query: &str,
    content_type: Option<&str>,
    chunk_size: usize,
    input: &Path,
    output_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = engine::global(&config.engine);
    runtime.initialize()?;
    let pool = WorkerPool::from_config(&config.processing)?;
    let router = MagickRouter::new(config, Arc::clone(&runtime), pool);

    let body = std::fs::read(input)?;
    let uri: Uri = format!("/?{query}").parse()?;
    let mut txn = Transaction::new(uri, origin_headers(&body, content_type)?);
    let routing = router.on_read_response_headers(&mut txn);

    let (emitted, outcome) = match txn.take_transform() {
        Some(mut transform) => {
            for chunk in body.chunks(chunk_size.max(1)) {
                transform.consume(chunk)?;
            }
            let (sink, events) = ChannelSink::new();
            transform.on_input_complete(Box::new(sink))?;

            let mut emitted = Vec::new();
            let outcome = loop {
                match events.recv()? {
                    SinkEvent::Chunk(chunk) => emitted.extend_from_slice(&chunk),
                    SinkEvent::Complete(outcome) => break outcome,
                }
            };
            rewrite_headers(&mut txn.response_headers, &outcome);
            (emitted, Some(outcome))
        }
        None => (body.clone(), None),
    };

    output::print_transform_output(routing, outcome.as_ref(), body.len());
    runtime.teardown();

    if let Some(Outcome::Failed { error }) = outcome {
        return Err(format!("transform failed: {error}").into());
    }
    std::fs::write(output_path, &emitted)?;
    if let Some(ct) = txn.response_headers.get(CONTENT_TYPE) {
        println!("Content-Type: {}", ct.to_str()?);
    }
    Ok(())
}
