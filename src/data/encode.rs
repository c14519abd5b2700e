//! JSON encoding with configurable layout.
//!
//! [`EncodingOptions`] enumerates the options a caller may pass through to the
//! encoder. The defaults reproduce the conventional JSON library layout:
//!
//! | option | default |
//! |---|---|
//! | `indent` | `None` (single line) |
//! | `sort_keys` | `false` (insertion order) |
//! | `separators` | `", "` / `": "`, or `","` / `": "` when indenting |
//! | `ensure_ascii` | `false` (UTF-8 output) |
//! | `type_hook` | `None` |

use super::sanitize::TypeHook;
use crate::error::ExportResult;
use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use serde_json::{Map, Value};
use std::fmt;
use std::io::{self, Write};

/// Item and key separators written between JSON tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Separators {
    /// Written between array items and between object members
    pub item: String,
    /// Written between an object key and its value
    pub key: String,
}

impl Separators {
    /// Separators from the given item and key strings.
    pub fn new(item: &str, key: &str) -> Self {
        Self {
            item: item.to_string(),
            key: key.to_string(),
        }
    }

    /// Tightest layout: `","` and `":"`.
    pub fn compact() -> Self {
        Self::new(",", ":")
    }
}

/// Options controlling how the metadata tree is written.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingOptions {
    /// Indent nested members by this many spaces (`Some(0)` inserts newlines only)
    pub indent: Option<usize>,
    /// Sort object keys at every level
    pub sort_keys: bool,
    /// Override the default separators
    pub separators: Option<Separators>,
    /// Escape every non-ASCII character as `\uXXXX`
    pub ensure_ascii: bool,
    /// Custom conversion applied to each value during sanitization
    #[serde(skip)]
    pub type_hook: Option<TypeHook>,
}

impl fmt::Debug for EncodingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodingOptions")
            .field("indent", &self.indent)
            .field("sort_keys", &self.sort_keys)
            .field("separators", &self.separators)
            .field("ensure_ascii", &self.ensure_ascii)
            .field("type_hook", &self.type_hook.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl EncodingOptions {
    /// Indented output with the given width.
    pub fn pretty(indent: usize) -> Self {
        Self {
            indent: Some(indent),
            ..Self::default()
        }
    }

    /// Set [`EncodingOptions::sort_keys`].
    pub fn with_sort_keys(mut self, sort_keys: bool) -> Self {
        self.sort_keys = sort_keys;
        self
    }

    /// Set [`EncodingOptions::separators`].
    pub fn with_separators(mut self, separators: Separators) -> Self {
        self.separators = Some(separators);
        self
    }

    /// Set [`EncodingOptions::ensure_ascii`].
    pub fn with_ensure_ascii(mut self, ensure_ascii: bool) -> Self {
        self.ensure_ascii = ensure_ascii;
        self
    }

    /// Install a [`TypeHook`].
    pub fn with_type_hook(mut self, hook: TypeHook) -> Self {
        self.type_hook = Some(hook);
        self
    }

    /// Separators actually used, after applying the indent-dependent default.
    pub fn effective_separators(&self) -> Separators {
        match (&self.separators, self.indent) {
            (Some(separators), _) => separators.clone(),
            (None, Some(_)) => Separators::new(",", ": "),
            (None, None) => Separators::new(", ", ": "),
        }
    }
}

/// Write `value` to `writer` using `options`. No trailing newline is written.
pub fn write_json<W: Write>(writer: W, value: &Value, options: &EncodingOptions) -> ExportResult<()> {
    let formatter = LayoutFormatter::new(options);
    let mut serializer = serde_json::Serializer::with_formatter(writer, formatter);
    if options.sort_keys {
        sorted(value).serialize(&mut serializer)?;
    } else {
        value.serialize(&mut serializer)?;
    }
    Ok(())
}

/// Encode `value` into a string using `options`.
pub fn to_json_string(value: &Value, options: &EncodingOptions) -> ExportResult<String> {
    let mut buf = Vec::new();
    write_json(&mut buf, value, options)?;
    // Formatter only ever emits UTF-8 (escapes are ASCII)
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Deep copy of `value` with every object's keys in sorted order.
pub fn sorted(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted(v)))
                    .collect::<Map<_, _>>(),
            )
        }
        other => other.clone(),
    }
}

/// `serde_json` formatter implementing indent, separators and ASCII escaping.
struct LayoutFormatter {
    indent: Option<Vec<u8>>,
    item_separator: Vec<u8>,
    key_separator: Vec<u8>,
    ensure_ascii: bool,
    depth: usize,
    has_value: bool,
}

impl LayoutFormatter {
    fn new(options: &EncodingOptions) -> Self {
        let separators = options.effective_separators();
        Self {
            indent: options.indent.map(|width| vec![b' '; width]),
            item_separator: separators.item.into_bytes(),
            key_separator: separators.key.into_bytes(),
            ensure_ascii: options.ensure_ascii,
            depth: 0,
            has_value: false,
        }
    }

    fn newline<W: ?Sized + Write>(&self, writer: &mut W) -> io::Result<()> {
        if let Some(indent) = &self.indent {
            writer.write_all(b"\n")?;
            for _ in 0..self.depth {
                writer.write_all(indent)?;
            }
        }
        Ok(())
    }

    fn begin<W: ?Sized + Write>(&mut self, writer: &mut W, open: &[u8]) -> io::Result<()> {
        self.depth += 1;
        self.has_value = false;
        writer.write_all(open)
    }

    fn end<W: ?Sized + Write>(&mut self, writer: &mut W, close: &[u8]) -> io::Result<()> {
        self.depth -= 1;
        if self.has_value {
            self.newline(writer)?;
        }
        writer.write_all(close)
    }

    fn member<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if !first {
            writer.write_all(&self.item_separator)?;
        }
        self.newline(writer)
    }
}

impl Formatter for LayoutFormatter {
    fn begin_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.begin(writer, b"[")
    }

    fn end_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.end(writer, b"]")
    }

    fn begin_array_value<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.member(writer, first)
    }

    fn end_array_value<W: ?Sized + Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        self.has_value = true;
        Ok(())
    }

    fn begin_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.begin(writer, b"{")
    }

    fn end_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.end(writer, b"}")
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.member(writer, first)
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.key_separator)
    }

    fn end_object_value<W: ?Sized + Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        self.has_value = true;
        Ok(())
    }

    fn write_string_fragment<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        if !self.ensure_ascii || fragment.is_ascii() {
            return writer.write_all(fragment.as_bytes());
        }
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({"b": 1, "a": {"y": [1, 2], "x": []}, "c": {}})
    }

    #[test]
    fn test_default_layout_is_single_line() {
        let text = to_json_string(&sample(), &EncodingOptions::default()).unwrap();
        assert_eq!(
            text,
            r#"{"b": 1, "a": {"y": [1, 2], "x": []}, "c": {}}"#
        );
    }

    #[test]
    fn test_indent_uses_newlines_and_trailing_comma_free_items() {
        let text = to_json_string(&json!({"a": [1, {}], "b": "x"}), &EncodingOptions::pretty(2))
            .unwrap();
        assert_eq!(text, "{\n  \"a\": [\n    1,\n    {}\n  ],\n  \"b\": \"x\"\n}");
    }

    #[test]
    fn test_zero_indent_inserts_newlines_only() {
        let text = to_json_string(&json!({"a": 1, "b": 2}), &EncodingOptions::pretty(0)).unwrap();
        assert_eq!(text, "{\n\"a\": 1,\n\"b\": 2\n}");
    }

    #[test]
    fn test_sort_keys_applies_at_every_level() {
        let options = EncodingOptions::default()
            .with_sort_keys(true)
            .with_separators(Separators::compact());
        let text = to_json_string(&sample(), &options).unwrap();
        assert_eq!(text, r#"{"a":{"x":[],"y":[1,2]},"b":1,"c":{}}"#);
    }

    #[test]
    fn test_ensure_ascii_escapes_non_ascii() {
        let value = json!({"sample": "µ-Sensor ☃ 🦀"});
        let options = EncodingOptions::default().with_ensure_ascii(true);
        let text = to_json_string(&value, &options).unwrap();
        assert_eq!(
            text,
            r#"{"sample": "\u00b5-Sensor \u2603 \ud83e\udd80"}"#
        );
        // still the same document once parsed
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), value);

        let plain = to_json_string(&value, &EncodingOptions::default()).unwrap();
        assert!(plain.contains('µ'));
    }

    #[test]
    fn test_control_characters_are_still_escaped() {
        let options = EncodingOptions::default().with_ensure_ascii(true);
        let text = to_json_string(&json!("tab\there\n"), &options).unwrap();
        assert_eq!(text, r#""tab\there\n""#);
    }

    #[test]
    fn test_effective_separators_depend_on_indent() {
        assert_eq!(
            EncodingOptions::default().effective_separators(),
            Separators::new(", ", ": ")
        );
        assert_eq!(
            EncodingOptions::pretty(4).effective_separators(),
            Separators::new(",", ": ")
        );
    }
}
