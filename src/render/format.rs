// src/render/format.rs

//! `{name}` / `{name:spec}` substitution shared by path patterns and job
//! templates.
//!
//! The syntax follows the brace-format convention used by the configs:
//!
//! - `{run_number}` inserts a value, `{run_number:08d}` pads it.
//! - `{{` and `}}` are literal braces.
//! - `${...}` is a shell expansion and is copied through untouched, as is
//!   anything in braces that is not a plain identifier (`{}`, `{a,b}`).
//!
//! Supported spec subset: `[[fill]align][sign][0][width][.precision][type]`
//! with types `d`, `f`, `F`, `s` (or none). A float with a precision but no
//! type is rounded to that many significant digits and switches to
//! scientific notation for large or small exponents (`{x:.3}` of `1234.5`
//! is `1.23e+03`, of `12.0` is `12.0`).

use std::collections::BTreeSet;
use std::fmt;

use serde_yaml::{Mapping, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// A field refers to a name missing from the namespace.
    Missing(String),
    /// The spec could not be parsed or does not apply to the value.
    BadSpec { field: String, spec: String, reason: String },
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Missing(name) => write!(f, "no value for placeholder {{{name}}}"),
            FormatError::BadSpec { field, spec, reason } => {
                write!(f, "invalid format spec '{spec}' for {{{field}}}: {reason}")
            }
        }
    }
}

impl std::error::Error for FormatError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Field { name: String, spec: String },
}

/// A parsed format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatString {
    pieces: Vec<Piece>,
}

impl FormatString {
    pub fn parse(src: &str) -> Self {
        let bytes = src.as_bytes();
        let mut pieces = Vec::new();
        let mut lit = String::new();
        let mut i = 0;

        while i < bytes.len() {
            let c = bytes[i];
            match c {
                b'$' if bytes.get(i + 1) == Some(&b'{') => {
                    let end = matching_brace(bytes, i + 1).unwrap_or(bytes.len() - 1);
                    lit.push_str(&src[i..=end]);
                    i = end + 1;
                }
                b'{' if bytes.get(i + 1) == Some(&b'{') => {
                    lit.push('{');
                    i += 2;
                }
                b'}' if bytes.get(i + 1) == Some(&b'}') => {
                    lit.push('}');
                    i += 2;
                }
                b'{' => match src[i + 1..].find('}') {
                    Some(rel) => {
                        let inner = &src[i + 1..i + 1 + rel];
                        match split_field(inner) {
                            Some((name, spec)) => {
                                if !lit.is_empty() {
                                    pieces.push(Piece::Literal(std::mem::take(&mut lit)));
                                }
                                pieces.push(Piece::Field {
                                    name: name.to_string(),
                                    spec: spec.to_string(),
                                });
                            }
                            None => {
                                lit.push('{');
                                lit.push_str(inner);
                                lit.push('}');
                            }
                        }
                        i += rel + 2;
                    }
                    None => {
                        lit.push_str(&src[i..]);
                        i = bytes.len();
                    }
                },
                _ => {
                    // Copy a full UTF-8 character.
                    let ch_len = src[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                    lit.push_str(&src[i..i + ch_len]);
                    i += ch_len;
                }
            }
        }

        if !lit.is_empty() {
            pieces.push(Piece::Literal(lit));
        }

        Self { pieces }
    }

    /// Names of all fields, deduplicated.
    pub fn field_names(&self) -> BTreeSet<String> {
        self.fields().map(|(name, _)| name.to_string()).collect()
    }

    pub(crate) fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pieces.iter().filter_map(|p| match p {
            Piece::Field { name, spec } => Some((name.as_str(), spec.as_str())),
            Piece::Literal(_) => None,
        })
    }

    /// Literal text and field names in order; used to build the reverse
    /// matcher for rendered templates.
    pub(crate) fn segments(&self) -> impl Iterator<Item = Result<&str, &str>> {
        self.pieces.iter().map(|p| match p {
            Piece::Literal(s) => Ok(s.as_str()),
            Piece::Field { name, .. } => Err(name.as_str()),
        })
    }

    /// Substitute every field; a missing name is an error.
    pub fn format(&self, ns: &Mapping) -> Result<String, FormatError> {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(s) => out.push_str(s),
                Piece::Field { name, spec } => {
                    let value = ns
                        .get(name.as_str())
                        .ok_or_else(|| FormatError::Missing(name.clone()))?;
                    out.push_str(&format_value(name, value, spec)?);
                }
            }
        }
        Ok(out)
    }
}

/// One-shot helper: parse and format.
pub fn format_str(src: &str, ns: &Mapping) -> Result<String, FormatError> {
    FormatString::parse(src).format(ns)
}

/// Plain string form of a value, as inserted by `{name}` without a spec.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(seq) => {
            let items: Vec<String> = seq.iter().map(value_to_string).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Mapping(map) => {
            let items: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", value_to_string(k), value_to_string(v)))
                .collect();
            format!("{{{}}}", items.join(", "))
        }
        Value::Tagged(tagged) => value_to_string(&tagged.value),
    }
}

const ESCAPE_CHARS: [char; 3] = ['=', ' ', '\\'];

/// Escape the characters that have to be protected inside patterns.
pub fn escape_path(path: &str) -> String {
    let mut out = path.to_string();
    // Backslash first so the inserted escapes are not doubled.
    for c in ESCAPE_CHARS.iter().rev() {
        out = out.replace(*c, &format!("\\{c}"));
    }
    out
}

/// Inverse of [`escape_path`].
pub fn unescape_path(path: &str) -> String {
    let mut out = path.to_string();
    for c in ESCAPE_CHARS {
        out = out.replace(&format!("\\{c}"), &c.to_string());
    }
    out
}

fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, b) in bytes[open..].iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_field(inner: &str) -> Option<(&str, &str)> {
    let (head, spec) = match inner.find(':') {
        Some(pos) => (&inner[..pos], &inner[pos + 1..]),
        None => (inner, ""),
    };
    // Drop a `!s` / `!r` conversion.
    let name = head.split('!').next().unwrap_or(head);
    if is_identifier(name) {
        Some((name, spec))
    } else {
        None
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Default)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    precision: Option<usize>,
    ty: Option<char>,
}

fn parse_spec(spec: &str) -> Result<Spec, String> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Spec::default();
    let mut i = 0;

    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        out.align = Some(chars[0]);
        i = 1;
    }

    if i < chars.len() && matches!(chars[i], '+' | '-' | ' ') {
        out.sign = Some(chars[i]);
        i += 1;
    }

    if i < chars.len() && chars[i] == '0' {
        out.zero = true;
        i += 1;
    }

    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i > start {
        let digits: String = chars[start..i].iter().collect();
        out.width = digits.parse().map_err(|_| "width out of range".to_string())?;
    }

    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return Err("missing precision after '.'".to_string());
        }
        let digits: String = chars[start..i].iter().collect();
        out.precision = Some(digits.parse().map_err(|_| "precision out of range".to_string())?);
    }

    if i < chars.len() {
        let ty = chars[i];
        if !matches!(ty, 'd' | 'f' | 'F' | 's') {
            return Err(format!("unsupported type '{ty}'"));
        }
        out.ty = Some(ty);
        i += 1;
    }

    if i != chars.len() {
        return Err("trailing characters".to_string());
    }
    Ok(out)
}

/// `value` rounded to `precision` significant digits. Fixed notation keeps
/// at least one fractional digit; scientific notation is used when the
/// exponent is below -4 or at least `precision - 1`.
fn general_float(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return if value.is_nan() { "nan".to_string() } else { "inf".to_string() };
    }
    let precision = precision.max(1);
    let sci = format!("{:.*e}", precision - 1, value);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i64 = exp.parse().unwrap_or(0);

    if (-4..precision as i64 - 1).contains(&exp) {
        let decimals = (precision as i64 - 1 - exp) as usize;
        let fixed = format!("{:.*}", decimals, value);
        let trimmed = fixed.trim_end_matches('0');
        return match trimmed.strip_suffix('.') {
            Some(int) => format!("{int}.0"),
            None => trimmed.to_string(),
        };
    }

    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.unsigned_abs())
}

fn format_value(field: &str, value: &Value, spec: &str) -> Result<String, FormatError> {
    if spec.is_empty() {
        return Ok(value_to_string(value));
    }

    let bad = |reason: String| FormatError::BadSpec {
        field: field.to_string(),
        spec: spec.to_string(),
        reason,
    };
    let parsed = parse_spec(spec).map_err(bad)?;

    let value = match value {
        Value::Tagged(tagged) => &tagged.value,
        other => other,
    };

    let (body, numeric, negative) = match (parsed.ty, value) {
        (Some('d'), Value::Number(n)) => match n.as_i64() {
            Some(v) => (v.unsigned_abs().to_string(), true, v < 0),
            None => match n.as_u64() {
                Some(v) => (v.to_string(), true, false),
                None => return Err(bad(format!("{n} is not an integer"))),
            },
        },
        (Some('d'), other) => {
            return Err(bad(format!("'{}' is not an integer", value_to_string(other))));
        }
        (Some('f') | Some('F'), Value::Number(n)) => {
            let v = n.as_f64().unwrap_or(0.0);
            let precision = parsed.precision.unwrap_or(6);
            (format!("{:.*}", precision, v.abs()), true, v < 0.0)
        }
        (Some('f') | Some('F'), other) => {
            return Err(bad(format!("'{}' is not a number", value_to_string(other))));
        }
        (_, Value::Number(n)) if parsed.ty.is_none() => {
            let text = match (parsed.precision, n.as_f64()) {
                (Some(p), Some(v)) if n.is_f64() => general_float(v.abs(), p),
                _ => n.to_string().trim_start_matches('-').to_string(),
            };
            let negative = n.as_f64().map(|v| v < 0.0).unwrap_or(false);
            (text, true, negative)
        }
        (_, other) => {
            let mut text = value_to_string(other);
            if let Some(p) = parsed.precision {
                text = text.chars().take(p).collect();
            }
            (text, false, false)
        }
    };

    let sign = if numeric {
        match (negative, parsed.sign) {
            (true, _) => "-",
            (false, Some('+')) => "+",
            (false, Some(' ')) => " ",
            _ => "",
        }
    } else {
        ""
    };

    let len = sign.chars().count() + body.chars().count();
    if len >= parsed.width {
        return Ok(format!("{sign}{body}"));
    }
    let pad = parsed.width - len;

    let (fill, align) = if parsed.zero && parsed.align.is_none() {
        ('0', '=')
    } else {
        (
            parsed.fill.unwrap_or(' '),
            parsed.align.unwrap_or(if numeric { '>' } else { '<' }),
        )
    };
    let padding = |n: usize| fill.to_string().repeat(n);

    Ok(match align {
        '<' => format!("{sign}{body}{}", padding(pad)),
        '^' => format!("{}{sign}{body}{}", padding(pad / 2), padding(pad - pad / 2)),
        '=' => format!("{sign}{}{body}", padding(pad)),
        _ => format!("{}{sign}{body}", padding(pad)),
    })
}
