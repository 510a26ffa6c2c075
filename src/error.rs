pub type MinibarsResult<T> = std::result::Result<T, MinibarsError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    UnexpectedEOF {
        /// Describes what was expected, e.g., "(expected '}}')"
        expected_what: String,
    },
    UnmatchedBlock {
        open_name: String,
        close_name: String,
    },
    Expected {
        description: String,
    },
    Message(String),
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedEOF { expected_what } => {
                write!(f, "Unexpected EOF{}", expected_what)
            }
            Self::UnmatchedBlock {
                open_name,
                close_name,
            } => {
                write!(
                    f,
                    "Block opened as '{}' but closed as '{}'",
                    open_name, close_name
                )
            }
            Self::Expected { description } => {
                write!(f, "Expected {}", description)
            }
            Self::Message(msg) => {
                write!(f, "Parser error: {}", msg)
            }
        }
    }
}

impl std::error::Error for ParseErrorKind {}

impl ParseErrorKind {
    pub fn unexpected_eof(expected: Option<String>) -> Self {
        Self::UnexpectedEOF {
            expected_what: expected.map_or_else(String::new, |e| format!(" (expected '{}')", e)),
        }
    }
}

/// A syntax error in a template, carrying the 1-indexed line and column at
/// which parsing failed.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub kind: ParseErrorKind,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parse error at line {}, column {}: {}",
            self.line, self.column, self.kind
        )
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MinibarsError {
    /// A referenced partial was never registered and no fallback body was
    /// supplied at the reference site.
    MissingPartial {
        partial_name: String,
    },
    /// A tag resolved to neither a registered helper nor a truthy context
    /// value. Raised by the default `helperMissing` helper, which a host
    /// application may override.
    UnknownHelper {
        helper_name: String,
    },
    /// `each` was given something other than a sequence or a mapping.
    UnknownEachType {
        found: String,
    },
    /// The transform saw a parse shape it has no rule for. Indicates a
    /// grammar/transform mismatch; always fatal.
    UnrecognizedAstShape {
        shape: String,
    },
    /// Partial expansion exceeded the nesting limit, most likely because a
    /// partial includes itself.
    RecursionLimit {
        partial_name: String,
    },
    Parse(ParseError),
}

impl std::fmt::Display for MinibarsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPartial { partial_name } => {
                write!(f, "Partial \"{}\" not registered", partial_name)
            }
            Self::UnknownHelper { helper_name } => {
                write!(f, "Helper \"{}\" does not exist", helper_name)
            }
            Self::UnknownEachType { found } => {
                write!(
                    f,
                    "unknown type {} provided to each helper, please provide an array or map",
                    found
                )
            }
            Self::UnrecognizedAstShape { shape } => {
                write!(f, "Unrecognized parse shape: {}", shape)
            }
            Self::RecursionLimit { partial_name } => {
                write!(
                    f,
                    "Recursion limit exceeded while expanding partial \"{}\"",
                    partial_name
                )
            }
            Self::Parse(parse_error) => {
                write!(f, "{}", parse_error)
            }
        }
    }
}

impl std::error::Error for MinibarsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(parse_error) => Some(parse_error),
            Self::MissingPartial { .. }
            | Self::UnknownHelper { .. }
            | Self::UnknownEachType { .. }
            | Self::UnrecognizedAstShape { .. }
            | Self::RecursionLimit { .. } => None,
        }
    }
}

impl From<ParseError> for MinibarsError {
    fn from(error: ParseError) -> Self {
        Self::Parse(error)
    }
}
