//! Decoding the `magick` query token into an argument vector.
//!
//! The token is standard base64 with a URL-safe substitution so it survives a
//! query string without escaping:
//!
//! | Standard | Token |
//! |---|---|
//! | `+` | `.` |
//! | `/` | `_` |
//! | `=` | `-` |
//!
//! The decoded payload is a space-separated command line, e.g.
//! `convert - -resize 50% webp:-`. [`ArgumentBuffer::decode`] punches a NUL
//! terminator over every space and records each non-empty run as one token.
//! The resulting [`ArgumentVector`] borrows the buffer, so no token can
//! outlive the bytes it points into.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::ffi::CStr;
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArgumentError {
    #[error("invalid base64 token: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decoded arguments contain a NUL byte at offset {offset}")]
    EmbeddedNul { offset: usize },
    #[error("decoded arguments are not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("decoded arguments contain no tokens")]
    Empty,
}

/// Map the URL-safe token alphabet back onto standard base64, in place.
fn to_standard_alphabet(bytes: &mut [u8]) {
    for byte in bytes {
        *byte = match *byte {
            b'.' => b'+',
            b'_' => b'/',
            b'-' => b'=',
            other => other,
        };
    }
}

/// Owned, decoded argument bytes with NUL-terminated tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentBuffer {
    bytes: Vec<u8>,
    tokens: Vec<Range<usize>>,
}

impl ArgumentBuffer {
    /// Decode a `magick` token.
    ///
    /// Fails on an invalid alphabet or padding, a NUL byte inside the decoded
    /// payload, a non-UTF-8 payload, or a payload with no tokens at all.
    pub fn decode(token: &[u8]) -> Result<Self, ArgumentError> {
        let mut raw = token.to_vec();
        to_standard_alphabet(&mut raw);
        let bytes = STANDARD.decode(&raw)?;
        Self::from_decoded(bytes)
    }

    /// Tokenize an already decoded payload.
    pub fn from_decoded(mut bytes: Vec<u8>) -> Result<Self, ArgumentError> {
        if let Some(offset) = bytes.iter().position(|&b| b == 0) {
            return Err(ArgumentError::EmbeddedNul { offset });
        }
        std::str::from_utf8(&bytes)?;

        let mut tokens = Vec::with_capacity(32);
        let mut j = 0;
        for i in 0..bytes.len() {
            if bytes[i] == b' ' {
                if i > j {
                    tokens.push(j..i);
                }
                bytes[i] = 0;
                j = i + 1;
            }
        }
        if bytes.len() > j {
            tokens.push(j..bytes.len());
            bytes.push(0);
        }

        if tokens.is_empty() {
            return Err(ArgumentError::Empty);
        }
        Ok(Self { bytes, tokens })
    }

    /// Borrow the tokens as an argument vector.
    pub fn arguments(&self) -> ArgumentVector<'_> {
        ArgumentVector {
            bytes: &self.bytes,
            tokens: &self.tokens,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Argv-style view over an [`ArgumentBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct ArgumentVector<'a> {
    bytes: &'a [u8],
    tokens: &'a [Range<usize>],
}

impl<'a> ArgumentVector<'a> {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Token `index` as text. Decoding guarantees UTF-8.
    pub fn get(&self, index: usize) -> Option<&'a str> {
        let range = self.tokens.get(index)?.clone();
        std::str::from_utf8(&self.bytes[range]).ok()
    }

    /// Token `index` including its NUL terminator, for argv-style callers.
    pub fn get_c_str(&self, index: usize) -> Option<&'a CStr> {
        let start = self.tokens.get(index)?.start;
        CStr::from_bytes_until_nul(&self.bytes[start..]).ok()
    }

    /// The command name, `argv[0]`.
    pub fn command(&self) -> Option<&'a str> {
        self.get(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a str> + 'a {
        let bytes = self.bytes;
        self.tokens
            .iter()
            .filter_map(move |range| std::str::from_utf8(&bytes[range.clone()]).ok())
    }

    pub fn to_vec(&self) -> Vec<&'a str> {
        self.iter().collect()
    }
}

/// Encode an argument list as a `magick` token.
pub fn encode<S: AsRef<str>>(arguments: &[S]) -> String {
    let joined = arguments
        .iter()
        .map(|a| a.as_ref())
        .collect::<Vec<_>>()
        .join(" ");
    STANDARD
        .encode(joined)
        .chars()
        .map(|c| match c {
            '+' => '.',
            '/' => '_',
            '=' => '-',
            other => other,
        })
        .collect()
}
