use crate::value::Value;

/// A pluggable string-escaping strategy, applied to `{{ }}` output.
pub trait Escaper {
    fn escape(&self, text: &str) -> String;
}

/// The default escaper. Escapes `& < > " '`; the character set is
/// configurable because reference implementations disagree on whether
/// backtick and `=` belong in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtmlEscaper {
    escape_backtick_and_equals: bool,
}

impl HtmlEscaper {
    pub const fn new() -> Self {
        Self {
            escape_backtick_and_equals: false,
        }
    }

    /// An escaper that additionally escapes backtick and `=`, matching the
    /// handlebars.js character set.
    pub const fn extended() -> Self {
        Self {
            escape_backtick_and_equals: true,
        }
    }
}

impl Default for HtmlEscaper {
    fn default() -> Self {
        Self::new()
    }
}

impl Escaper for HtmlEscaper {
    fn escape(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                '`' if self.escape_backtick_and_equals => out.push_str("&#x60;"),
                '=' if self.escape_backtick_and_equals => out.push_str("&#x3D;"),
                other => out.push(other),
            }
        }
        out
    }
}

/// Escapes `text` with the default [`HtmlEscaper`], for helpers that build
/// their own markup.
///
/// ```rust
/// assert_eq!(minibars::escape_expression("a < b"), "a &lt; b");
/// ```
pub fn escape_expression(text: &str) -> String {
    HtmlEscaper::new().escape(text)
}

/// Escapes a rendered value unless it is explicitly marked safe.
pub(crate) fn escape_value(escaper: &dyn Escaper, value: &Value) -> String {
    match value {
        Value::Safe(s) => s.clone(),
        Value::Null
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        | Value::String(_)
        | Value::Array(_)
        | Value::Map(_) => escaper.escape(&value.to_string()),
    }
}
