//! File prefix templates.
//!
//! The prefix of the metadata filename may reference fields of the start
//! document, e.g. `{proposal_id}-{sample_name}-`. Supported syntax is the
//! common subset of Python's `str.format`:
//!
//! - `{{` and `}}` for literal braces
//! - `{field}`, dotted paths `{plan_args.num}` and indexing `{motors[0]}`,
//!   `{hints[fields]}`
//! - `{start.field}`: a leading `start` addresses the start document itself
//!   (unless the document has its own `start` field)
//! - conversions `!s` and `!r`
//! - format specs after `:` in Python's mini-language,
//!   `[[fill]align][sign][#][0][width][grouping][.precision][type]`, e.g.
//!   `{scan_id:05d}` or `{temperature:.1f}`. Padding goes through `strfmt`.
//! - a spec that is not a standard spec but contains `%` is a strftime pattern
//!   applied to epoch seconds or RFC 3339 strings, in UTC:
//!   `{time:%Y-%m-%d_%H-%M}`
//!
//! Syntax errors are reported by [`FilenameTemplate::parse`]; fields missing
//! from the start document are reported by [`FilenameTemplate::render`].

use crate::error::TemplateError;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Prefix used when none is configured; `uid` is always present and unique.
pub const DEFAULT_FILE_PREFIX: &str = "{uid}-";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    Str,
    Repr,
}

/// How a field's value is turned into text.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Format {
    Plain,
    Standard(FormatSpec),
    Time,
}

/// A parsed standard format spec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: Option<usize>,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    name: String,
    path: Vec<Segment>,
    conversion: Option<Conversion>,
    spec: String,
    format: Format,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Field(Field),
}

/// A parsed file prefix template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    source: String,
    pieces: Vec<Piece>,
}

impl FilenameTemplate {
    /// Parse `template`, checking brace balance, field paths, conversions and
    /// format specs.
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let unmatched = |brace, position| TemplateError::UnmatchedBrace {
            template: template.to_string(),
            brace,
            position,
        };

        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices().peekable();

        while let Some((position, ch)) = chars.next() {
            match ch {
                '{' if chars.peek().map(|&(_, c)| c) == Some('{') => {
                    chars.next();
                    literal.push('{');
                }
                '{' => {
                    let mut body = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(TemplateError::UnsupportedField {
                                    field: body,
                                    reason: "nested replacement fields are not supported".into(),
                                })
                            }
                            c => body.push(c),
                        }
                    }
                    if !closed {
                        return Err(unmatched('{', position));
                    }
                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(Piece::Field(Field::parse(&body)?));
                }
                '}' if chars.peek().map(|&(_, c)| c) == Some('}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(unmatched('}', position)),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(Self {
            source: template.to_string(),
            pieces,
        })
    }

    /// The template text as given.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when the template references no fields at all.
    pub fn is_constant(&self) -> bool {
        self.pieces.iter().all(|p| matches!(p, Piece::Literal(_)))
    }

    /// Names of every referenced field, in order of appearance.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|p| match p {
            Piece::Field(field) => Some(field.name.as_str()),
            Piece::Literal(_) => None,
        })
    }

    /// Fill in the template from the (sanitized) start document.
    pub fn render(&self, start: &Map<String, Value>) -> Result<String, TemplateError> {
        let root = Value::Object(start.clone());
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Field(field) => out.push_str(&field.render(&root)?),
            }
        }
        Ok(out)
    }
}

impl Default for FilenameTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_FILE_PREFIX.to_string(),
            pieces: vec![
                Piece::Field(Field {
                    name: "uid".into(),
                    path: vec![Segment::Key("uid".into())],
                    conversion: None,
                    spec: String::new(),
                    format: Format::Plain,
                }),
                Piece::Literal("-".into()),
            ],
        }
    }
}

impl FromStr for FilenameTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FilenameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Field {
    fn parse(body: &str) -> Result<Self, TemplateError> {
        let unsupported = |reason: &str| TemplateError::UnsupportedField {
            field: body.to_string(),
            reason: reason.to_string(),
        };

        let (head, spec) = body.split_once(':').unwrap_or((body, ""));
        let (name, conversion) = match head.split_once('!') {
            Some((name, "s")) => (name, Some(Conversion::Str)),
            Some((name, "r")) => (name, Some(Conversion::Repr)),
            Some((name, other)) => {
                return Err(TemplateError::InvalidConversion {
                    field: name.to_string(),
                    conversion: other.to_string(),
                })
            }
            None => (head, None),
        };

        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(unsupported("positional fields are not supported, name a start document field"));
        }

        let mut path = Vec::new();
        let mut rest = name;
        let first_end = rest.find(['.', '[']).unwrap_or(rest.len());
        path.push(Segment::Key(rest[..first_end].to_string()));
        rest = &rest[first_end..];

        while !rest.is_empty() {
            if let Some(after_dot) = rest.strip_prefix('.') {
                let end = after_dot.find(['.', '[']).unwrap_or(after_dot.len());
                if end == 0 {
                    return Err(unsupported("empty attribute name"));
                }
                path.push(Segment::Key(after_dot[..end].to_string()));
                rest = &after_dot[end..];
            } else if let Some(after_bracket) = rest.strip_prefix('[') {
                let end = after_bracket
                    .find(']')
                    .ok_or_else(|| unsupported("missing ']'"))?;
                let key = &after_bracket[..end];
                if key.is_empty() {
                    return Err(unsupported("empty index"));
                }
                path.push(match key.parse::<usize>() {
                    Ok(index) => Segment::Index(index),
                    Err(_) => Segment::Key(key.to_string()),
                });
                rest = &after_bracket[end + 1..];
            } else {
                return Err(unsupported("expected '.' or '[' after a field name"));
            }
        }

        let format = if spec.is_empty() {
            Format::Plain
        } else {
            match FormatSpec::parse(spec) {
                Ok(parsed) => Format::Standard(parsed),
                Err(_) if spec.contains('%') => {
                    check_strftime(name, spec)?;
                    Format::Time
                }
                Err(reason) => {
                    return Err(TemplateError::InvalidFormatSpec {
                        field: name.to_string(),
                        spec: spec.to_string(),
                        reason,
                    })
                }
            }
        };

        Ok(Self {
            name: name.to_string(),
            path,
            conversion,
            spec: spec.to_string(),
            format,
        })
    }

    fn resolve<'a>(&self, root: &'a Value) -> Result<&'a Value, TemplateError> {
        let mut segments = self.path.as_slice();
        if let [Segment::Key(first), rest @ ..] = segments {
            if first == "start" && !rest.is_empty() && root.get("start").is_none() {
                segments = rest;
            }
        }

        let mut current = root;
        for segment in segments {
            let next = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key),
                (Segment::Index(i), Value::Array(items)) => items.get(*i),
                (Segment::Index(i), Value::Object(map)) => map.get(&i.to_string()),
                _ => None,
            };
            current = next.ok_or_else(|| TemplateError::UnknownField {
                field: self.name.clone(),
            })?;
        }
        Ok(current)
    }

    fn render(&self, root: &Value) -> Result<String, TemplateError> {
        let resolved = self.resolve(root)?;
        let converted = self.conversion.map(|conversion| match conversion {
            Conversion::Str => Value::String(display(resolved)),
            Conversion::Repr => Value::String(repr(resolved)),
        });
        let value = converted.as_ref().unwrap_or(resolved);

        match &self.format {
            Format::Plain => Ok(display(value)),
            Format::Time => self.format_time(value),
            Format::Standard(spec) => spec.apply(value).map_err(|reason| self.invalid_spec(reason)),
        }
    }

    fn format_time(&self, value: &Value) -> Result<String, TemplateError> {
        let timestamp = match value {
            Value::Number(n) => n.as_f64().and_then(from_epoch_secs),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
        .ok_or_else(|| {
            self.invalid_spec(format!(
                "time formatting needs epoch seconds or an RFC 3339 string, got {value}"
            ))
        })?;
        Ok(timestamp.format(&self.spec).to_string())
    }

    fn invalid_spec(&self, reason: String) -> TemplateError {
        TemplateError::InvalidFormatSpec {
            field: self.name.clone(),
            spec: self.spec.clone(),
            reason,
        }
    }
}

impl FormatSpec {
    fn parse(spec: &str) -> Result<Self, String> {
        let chars: Vec<char> = spec.chars().collect();
        let is_align = |c: char| matches!(c, '<' | '>' | '=' | '^');
        let mut parsed = FormatSpec::default();
        let mut i = 0;

        if chars.len() >= 2 && is_align(chars[1]) {
            parsed.fill = Some(chars[0]);
            parsed.align = Some(chars[1]);
            i = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            parsed.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c) = chars.get(i).filter(|c| matches!(**c, '+' | '-' | ' ')) {
            parsed.sign = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'#') {
            parsed.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            parsed.zero = true;
            i += 1;
        }
        parsed.width = digits(&chars, &mut i)?;
        if let Some(&c) = chars.get(i).filter(|c| matches!(**c, ',' | '_')) {
            parsed.grouping = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            parsed.precision = Some(
                digits(&chars, &mut i)?.ok_or_else(|| "format specifier missing precision".to_string())?,
            );
        }
        if let Some(&c) = chars.get(i) {
            if "bcdeEfFgGnosxX%".contains(c) {
                parsed.kind = Some(c);
                i += 1;
            }
        }
        if i != chars.len() {
            return Err(format!("invalid format specifier '{spec}'"));
        }
        Ok(parsed)
    }

    fn apply(&self, value: &Value) -> Result<String, String> {
        match value {
            Value::String(s) => self.format_str(s),
            Value::Bool(b) => self.format_int(i128::from(*b)),
            Value::Number(n) => match n.as_i64().map(i128::from).or_else(|| n.as_u64().map(i128::from)) {
                Some(int) => self.format_int(int),
                None => self.format_float(n.as_f64().unwrap_or_default()),
            },
            Value::Null => Err("unsupported format string passed to None".into()),
            Value::Array(_) => Err("unsupported format string passed to a list".into()),
            Value::Object(_) => Err("unsupported format string passed to a mapping".into()),
        }
    }

    fn format_str(&self, s: &str) -> Result<String, String> {
        if let Some(kind) = self.kind.filter(|&k| k != 's') {
            return Err(format!("unknown format code '{kind}' for a string"));
        }
        if self.sign.is_some() {
            return Err("sign not allowed in string format specifier".into());
        }
        if self.alternate {
            return Err("alternate form (#) not allowed in string format specifier".into());
        }
        if self.grouping.is_some() {
            return Err("cannot specify grouping with a string".into());
        }
        if self.align == Some('=') {
            return Err("'=' alignment not allowed in string format specifier".into());
        }
        let text = match self.precision {
            Some(precision) => s.chars().take(precision).collect(),
            None => s.to_string(),
        };
        self.pad("", text, false)
    }

    fn format_int(&self, value: i128) -> Result<String, String> {
        let magnitude = value.unsigned_abs();
        let (prefix, digits) = match self.kind {
            None | Some('d' | 'n') => ("", group(magnitude.to_string(), self.grouping, 3)),
            Some('b') => ("0b", group(format!("{magnitude:b}"), self.radix_grouping()?, 4)),
            Some('o') => ("0o", group(format!("{magnitude:o}"), self.radix_grouping()?, 4)),
            Some('x') => ("0x", group(format!("{magnitude:x}"), self.radix_grouping()?, 4)),
            Some('X') => ("0X", group(format!("{magnitude:X}"), self.radix_grouping()?, 4)),
            Some('c') => {
                let c = u32::try_from(value)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| format!("%c arg not in range: {value}"))?;
                return self.pad("", c.to_string(), false);
            }
            // rounds above 2^53, as Python's float() does
            Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => return self.format_float(value as f64),
            Some(kind) => return Err(format!("unknown format code '{kind}' for an integer")),
        };
        if self.precision.is_some() {
            return Err("precision not allowed in integer format specifier".into());
        }
        let prefix = if self.alternate { prefix } else { "" };
        let sign = self.sign_text(value < 0);
        self.pad(&format!("{sign}{prefix}"), digits, true)
    }

    fn format_float(&self, value: f64) -> Result<String, String> {
        let magnitude = value.abs();
        let upper = matches!(self.kind, Some('E' | 'G'));
        let body = match self.kind {
            Some('f' | 'F') => fixed(magnitude, self.precision.unwrap_or(6)),
            Some('e' | 'E') => scientific(magnitude, self.precision.unwrap_or(6), upper),
            Some('g' | 'G' | 'n') => general(magnitude, self.precision.unwrap_or(6), self.alternate, false, upper),
            Some('%') => format!("{}%", fixed(magnitude * 100.0, self.precision.unwrap_or(6))),
            None => match self.precision {
                Some(precision) => general(magnitude, precision, self.alternate, true, false),
                None => float_repr(magnitude),
            },
            Some(kind) => return Err(format!("unknown format code '{kind}' for a float")),
        };
        let body = group(body, self.grouping, 3);
        let sign = self.sign_text(value.is_sign_negative());
        self.pad(sign, body, true)
    }

    fn radix_grouping(&self) -> Result<Option<char>, String> {
        match self.grouping {
            Some(',') => Err("cannot specify ',' with a binary, octal or hex format".into()),
            other => Ok(other),
        }
    }

    fn sign_text(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, Some('+')) => "+",
            (false, Some(' ')) => " ",
            _ => "",
        }
    }

    /// Pad `prefix` + `body` to the requested width. Zero padding and `=`
    /// alignment go between the two.
    fn pad(&self, prefix: &str, body: String, numeric: bool) -> Result<String, String> {
        let len = prefix.chars().count() + body.chars().count();
        let width = self.width.unwrap_or(0);
        if len >= width {
            return Ok(format!("{prefix}{body}"));
        }

        let fill = self.fill.unwrap_or(if self.zero { '0' } else { ' ' });
        let align = self.align.unwrap_or(match (numeric, self.zero) {
            (true, true) => '=',
            (true, false) => '>',
            (false, _) => '<',
        });
        if align == '=' {
            let padding: String = std::iter::repeat(fill).take(width - len).collect();
            return Ok(format!("{prefix}{padding}{body}"));
        }
        apply_spec(&format!("{{value:{fill}{align}{width}}}"), format!("{prefix}{body}"))
            .map_err(|e| e.to_string())
    }
}

/// Read a run of ASCII digits starting at `*i`.
fn digits(chars: &[char], i: &mut usize) -> Result<Option<usize>, String> {
    let start = *i;
    while chars.get(*i).is_some_and(char::is_ascii_digit) {
        *i += 1;
    }
    if start == *i {
        return Ok(None);
    }
    let text: String = chars[start..*i].iter().collect();
    text.parse()
        .map(Some)
        .map_err(|_| format!("too many decimal digits in format string: {text}"))
}

/// Insert `separator` every `every` digits into the integer part of `text`.
///
/// Decimal text (`every == 3`) ends its integer part at the first non-digit;
/// binary, octal and hex text is all digits.
fn group(text: String, separator: Option<char>, every: usize) -> String {
    let Some(separator) = separator else {
        return text;
    };
    let end = match every {
        3 => text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len()),
        _ => text.len(),
    };
    let (run, rest) = text.split_at(end);
    let mut grouped = String::with_capacity(text.len() + run.len() / every);
    for (i, c) in run.chars().enumerate() {
        if i > 0 && (run.len() - i) % every == 0 {
            grouped.push(separator);
        }
        grouped.push(c);
    }
    grouped.push_str(rest);
    grouped
}

fn fixed(value: f64, precision: usize) -> String {
    format!("{value:.precision$}")
}

fn split_exponent(text: &str) -> (&str, i32) {
    match text.split_once('e') {
        Some((mantissa, exp)) => (mantissa, exp.parse().unwrap_or(0)),
        None => (text, 0),
    }
}

/// Python's exponent layout: signed, at least two digits.
fn join_exponent(mantissa: &str, exp: i32, upper: bool) -> String {
    let marker = if upper { 'E' } else { 'e' };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}{marker}{sign}{:02}", exp.unsigned_abs())
}

fn scientific(value: f64, precision: usize, upper: bool) -> String {
    let text = format!("{value:.precision$e}");
    let (mantissa, exp) = split_exponent(&text);
    join_exponent(mantissa, exp, upper)
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// The `g` presentation. With `add_dot_zero` (a precision without a type) fixed
/// notation switches to exponent one digit earlier and keeps a fractional digit.
fn general(value: f64, precision: usize, alternate: bool, add_dot_zero: bool, upper: bool) -> String {
    let precision = precision.max(1);
    let significant = i32::try_from(precision).unwrap_or(i32::MAX);
    let rounded = format!("{:.*e}", precision - 1, value);
    let (mantissa, exp) = split_exponent(&rounded);
    let limit = if add_dot_zero { significant - 1 } else { significant };

    if (-4..limit).contains(&exp) {
        let decimals = usize::try_from(significant - 1 - exp).unwrap_or(0);
        let text = fixed(value, decimals);
        let mut text = if alternate { text } else { trim_fraction(&text).to_string() };
        if add_dot_zero && !text.contains('.') {
            text.push_str(".0");
        }
        text
    } else {
        let mantissa = if alternate { mantissa } else { trim_fraction(mantissa) };
        join_exponent(mantissa, exp, upper)
    }
}

/// Shortest round-trip text of a float, laid out the way Python's `repr` does.
fn float_repr(value: f64) -> String {
    let shortest = format!("{value:e}");
    let (mantissa, exp) = split_exponent(&shortest);
    if (-4..16).contains(&exp) {
        let text = value.to_string();
        if text.contains('.') {
            text
        } else {
            format!("{text}.0")
        }
    } else {
        join_exponent(mantissa, exp, false)
    }
}

fn check_strftime(field: &str, spec: &str) -> Result<(), TemplateError> {
    if StrftimeItems::new(spec).any(|item| matches!(item, Item::Error)) {
        return Err(TemplateError::InvalidFormatSpec {
            field: field.to_string(),
            spec: spec.to_string(),
            reason: "not a valid strftime pattern".into(),
        });
    }
    Ok(())
}

fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

fn apply_spec<T: strfmt::DisplayStr>(fmt: &str, value: T) -> Result<String, strfmt::FmtError> {
    let mut vars = HashMap::new();
    vars.insert("value".to_string(), value);
    strfmt::strfmt(fmt, &vars)
}

fn number(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() => float_repr(f),
        _ => n.to_string(),
    }
}

/// Human-facing rendering of a value, as `str()` would produce it.
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => repr(other),
    }
}

/// Unambiguous rendering of a value, as `repr()` would produce it.
fn repr(value: &Value) -> String {
    match value {
        Value::Null => "None".into(),
        Value::Bool(true) => "True".into(),
        Value::Bool(false) => "False".into(),
        Value::Number(n) => number(n),
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Array(items) => {
            let items: Vec<_> = items.iter().map(repr).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let members: Vec<_> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", repr(&Value::String(k.clone())), repr(v)))
                .collect();
            format!("{{{}}}", members.join(", "))
        }
    }
}
