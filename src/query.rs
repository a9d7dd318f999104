//! Zero-copy query string parsing.
//!
//! A [`QueryMap`] owns the raw query string (everything after `?`) exactly
//! once and records every key and value as a [`Span`] into it. Lookups hand
//! back borrowed `&str` slices, so no value is ever copied out of the
//! original text.
//!
//! ## Scan rules
//!
//! The parser is a single left-to-right pass:
//!
//! - `=` fixes the pending key to the current field and starts the value.
//!   Every `=` overwrites the key, so `a=b=c` yields key `b`, value `c`.
//! - `&` appends the pending value under the pending key. Fields without a
//!   pending key are dropped, which skips empty fields (`&&`) and bare tokens
//!   in the middle of the string.
//! - At the end, a pending `key=value` contributes one value; a trailing bare
//!   token is recorded as a key with no values.
//!
//! ```text
//! ""          → {}
//! "a=1&a=2"   → { a: ["1", "2"] }
//! "a"         → { a: [] }
//! "a="        → { a: [""] }
//! "&a=1&"     → { a: ["1"] }
//! ```
//!
//! Values are not percent-decoded. The `magick` token alphabet never needs
//! escaping, and decoding would force a copy.

use std::ops::Range;

/// A view into the owned query string: byte offset plus length.
pub type Span = Range<usize>;

static NO_VALUES: [Span; 0] = [];

/// Parsed query string: key → ordered list of values.
///
/// Keys keep the order of their first appearance. Lookup is a linear scan;
/// query strings carry a handful of keys at most.
#[derive(Debug, Clone, Default)]
pub struct QueryMap {
    content: String,
    entries: Vec<(Span, Vec<Span>)>,
}

impl QueryMap {
    /// Take ownership of `query` and parse it.
    pub fn parse(query: impl Into<String>) -> Self {
        let mut map = Self {
            content: query.into(),
            entries: Vec::new(),
        };
        map.scan();
        map
    }

    fn scan(&mut self) {
        let len = self.content.len();
        let mut key: Span = 0..0;
        let mut j = 0;
        let mut i = 0;

        while i < len {
            match self.content.as_bytes()[i] {
                b'&' => {
                    if !key.is_empty() {
                        let value = j..i;
                        self.slot(key).push(value);
                        key = 0..0;
                    }
                    j = i + 1;
                }
                b'=' => {
                    key = j..i;
                    j = i + 1;
                }
                _ => {}
            }
            i += 1;
        }

        if key.is_empty() {
            if j < i {
                self.slot(j..i);
            }
        } else {
            self.slot(key).push(j..i);
        }
    }

    /// Values recorded under `key`, inserting an empty list on first sight.
    fn slot(&mut self, key: Span) -> &mut Vec<Span> {
        let text = &self.content[key.clone()];
        let position = self
            .entries
            .iter()
            .position(|(k, _)| &self.content[k.clone()] == text);
        let index = match position {
            Some(index) => index,
            None => {
                self.entries.push((key, Vec::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }

    fn find(&self, key: &str) -> Option<&[Span]> {
        self.entries
            .iter()
            .find(|(k, _)| &self.content[k.clone()] == key)
            .map(|(_, values)| values.as_slice())
    }

    /// Values for `key`. An absent key yields the shared empty list.
    pub fn get(&self, key: &str) -> Values<'_> {
        Values {
            content: &self.content,
            spans: self.find(key).unwrap_or(&NO_VALUES),
        }
    }

    /// Whether `key` was seen at all, even without a value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    /// First value for `key`, if any.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.get(key).first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The owned query string, exactly as received.
    pub fn as_str(&self) -> &str {
        &self.content
    }

    /// Iterate `(key, values)` in first-appearance order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Values<'_>)> {
        self.entries.iter().map(|(key, spans)| {
            (
                &self.content[key.clone()],
                Values {
                    content: &self.content,
                    spans,
                },
            )
        })
    }
}

/// Borrowed list of values for one key.
#[derive(Debug, Clone, Copy)]
pub struct Values<'a> {
    content: &'a str,
    spans: &'a [Span],
}

impl<'a> Values<'a> {
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&'a str> {
        self.spans.get(index).map(|s| &self.content[s.clone()])
    }

    pub fn first(&self) -> Option<&'a str> {
        self.get(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a str> + 'a {
        let content = self.content;
        self.spans.iter().map(move |s| &content[s.clone()])
    }

    pub fn to_vec(&self) -> Vec<&'a str> {
        self.iter().collect()
    }

    /// Spans into [`QueryMap::as_str`].
    pub fn spans(&self) -> &'a [Span] {
        self.spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(map: &QueryMap) -> Vec<&str> {
        map.iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn empty_string_parses_to_empty_map() {
        let map = QueryMap::parse("");
        assert!(map.is_empty());
        assert!(map.get("magick").is_empty());
    }

    #[test]
    fn missing_key_returns_shared_empty_list() {
        let map = QueryMap::parse("a=1&b=2");
        let values = map.get("missingKey");
        assert!(values.is_empty());
        assert!(std::ptr::eq(values.spans(), &NO_VALUES[..]));
        assert!(!map.contains_key("missingKey"));
    }

    #[test]
    fn distinct_keys() {
        let map = QueryMap::parse("a=1&b=2");
        assert_eq!(map.get("a").to_vec(), vec!["1"]);
        assert_eq!(map.get("b").to_vec(), vec!["2"]);
        assert_eq!(keys(&map), vec!["a", "b"]);
    }

    #[test]
    fn repeated_key_preserves_insertion_order() {
        let map = QueryMap::parse("a=1&a=2");
        assert_eq!(map.get("a").to_vec(), vec!["1", "2"]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn bare_trailing_key_is_present_without_values() {
        let map = QueryMap::parse("a");
        assert!(map.contains_key("a"));
        assert!(map.get("a").is_empty());
    }

    #[test]
    fn empty_value_is_recorded() {
        let map = QueryMap::parse("a=");
        assert_eq!(map.get("a").to_vec(), vec![""]);
    }

    #[test]
    fn leading_and_trailing_ampersands_are_skipped() {
        let map = QueryMap::parse("&a=1&");
        assert_eq!(keys(&map), vec!["a"]);
        assert_eq!(map.get("a").to_vec(), vec!["1"]);
    }

    #[test]
    fn double_ampersand_is_skipped() {
        let map = QueryMap::parse("a=1&&b=2");
        assert_eq!(keys(&map), vec!["a", "b"]);
    }

    #[test]
    fn last_equals_sign_splits_key_and_value() {
        let map = QueryMap::parse("a=b=c");
        assert!(!map.contains_key("a"));
        assert_eq!(map.get("b").to_vec(), vec!["c"]);
    }

    #[test]
    fn bare_token_mid_string_is_dropped() {
        let map = QueryMap::parse("a&b=1");
        assert!(!map.contains_key("a"));
        assert_eq!(map.get("b").to_vec(), vec!["1"]);
    }

    #[test]
    fn trailing_field_with_empty_key_becomes_bare_key() {
        let map = QueryMap::parse("x=1&=v");
        assert_eq!(map.get("x").to_vec(), vec!["1"]);
        assert!(map.contains_key("v"));
        assert!(map.get("v").is_empty());
    }

    #[test]
    fn values_alias_owned_storage() {
        let map = QueryMap::parse("magick=abc&magickSig=def");
        let value = map.first("magick").unwrap();
        let base = map.as_str().as_ptr() as usize;
        assert_eq!(value.as_ptr() as usize - base, "magick=".len());
    }

    #[test]
    fn signature_and_arguments_side_by_side() {
        let map = QueryMap::parse("w=1&magick=Y29udmVydA--&magickSig=xyz");
        assert_eq!(map.first("magick"), Some("Y29udmVydA--"));
        assert_eq!(map.first("magickSig"), Some("xyz"));
        assert_eq!(map.first("w"), Some("1"));
    }
}
