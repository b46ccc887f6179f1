//! Masking of sensitive values before they reach a log sink.
//!
//! Only a bounded prefix and suffix of a value stay visible; everything in
//! between is replaced with [`MASK_CHAR`]. Redaction is total: every input
//! category produces a string and nothing here can fail.
//!
//! ```rust,ignore
//! use telemetry::redact::{redact_string, Redacted};
//!
//! assert_eq!(redact_string("api-key-12345"), "a***********5");
//! tracing::info!(token = %Redacted(&token), "token refreshed");
//! ```

use std::borrow::Cow;
use std::fmt;

/// Character used to mask hidden positions
pub const MASK_CHAR: char = '*';

/// Output for an absent value
pub const ABSENT_PLACEHOLDER: &str = "<none>";

/// Output for an empty string
pub const EMPTY_PLACEHOLDER: &str = "<empty>";

/// Default number of characters kept visible at each end
pub const DEFAULT_VISIBLE_CHARS: usize = 1;

/// A loggable value before redaction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RedactInput<'a> {
    Absent,
    Str(&'a str),
    Bool(bool),
    Int(i128),
    Float(f64),
}

impl RedactInput<'_> {
    /// Canonical string form. Booleans are matched before the numeric arms and
    /// render capitalised, `True` and `False`.
    fn canonical(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Absent => None,
            Self::Str(s) => Some(Cow::Borrowed(s)),
            Self::Bool(true) => Some(Cow::Borrowed("True")),
            Self::Bool(false) => Some(Cow::Borrowed("False")),
            Self::Int(n) => Some(Cow::Owned(n.to_string())),
            Self::Float(f) => Some(Cow::Owned(f.to_string())),
        }
    }
}

impl<'a> From<&'a str> for RedactInput<'a> {
    fn from(value: &'a str) -> Self {
        Self::Str(value)
    }
}

impl<'a> From<&'a String> for RedactInput<'a> {
    fn from(value: &'a String) -> Self {
        Self::Str(value.as_str())
    }
}

impl From<bool> for RedactInput<'_> {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for RedactInput<'_> {
                fn from(value: $ty) -> Self {
                    Self::Int(i128::from(value))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl From<f32> for RedactInput<'_> {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for RedactInput<'_> {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<'a, T> From<Option<T>> for RedactInput<'a>
where
    T: Into<RedactInput<'a>>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Into::into)
    }
}

/// Redact a value keeping `visible` characters at each end
pub fn redact_value<'a>(value: impl Into<RedactInput<'a>>, visible: usize) -> String {
    let input = value.into();
    match input.canonical() {
        None => ABSENT_PLACEHOLDER.to_string(),
        Some(text) => mask(&text, visible),
    }
}

/// Redact a value with the default visibility of one character
pub fn redact_string<'a>(value: impl Into<RedactInput<'a>>) -> String {
    redact_value(value, DEFAULT_VISIBLE_CHARS)
}

fn mask(text: &str, visible: usize) -> String {
    let len = text.chars().count();

    if len == 0 {
        return EMPTY_PLACEHOLDER.to_string();
    }

    if visible == 0 || len <= visible {
        return mask_run(len);
    }

    if len <= visible * 2 {
        let first = text.chars().next().unwrap_or(MASK_CHAR);
        let last = text.chars().next_back().unwrap_or(MASK_CHAR);
        return [first, MASK_CHAR, last].iter().collect();
    }

    let mut out = String::with_capacity(text.len());
    out.extend(text.chars().take(visible));
    out.extend(std::iter::repeat(MASK_CHAR).take(len - visible * 2));
    out.extend(text.chars().skip(len - visible));
    out
}

fn mask_run(len: usize) -> String {
    std::iter::repeat(MASK_CHAR).take(len).collect()
}

/// Display wrapper that redacts on format, for use as `field = %Redacted(&v)`
#[derive(Debug, Clone, Copy)]
pub struct Redacted<T>(pub T);

impl<'a, T> fmt::Display for Redacted<T>
where
    T: Copy + Into<RedactInput<'a>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact_string(self.0))
    }
}
