mod ast;
mod context;
mod engine;
mod error;
mod escape;
mod helper;
mod helpers;
mod parser;
mod template;
mod transform;
mod value;

// Public exports.
pub use ast::Collapse;
pub use context::Context;
pub use engine::MinibarsEngine;
pub use error::{MinibarsError, MinibarsResult, ParseError, ParseErrorKind};
pub use escape::{escape_expression, Escaper, HtmlEscaper};
pub use helper::{CollapseHints, HelperFn, HelperOptions};
pub use template::Template;
pub use value::Value;
