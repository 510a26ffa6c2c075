use std::borrow::Cow;

use crate::ast::Collapse;
use crate::error::{ParseError, ParseErrorKind};

type ParseResult<T> = Result<T, ParseError>;

/// A named (`key=value`) argument inside a tag.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NamedParameter<'a> {
    pub(crate) key: &'a str,
    pub(crate) value: ParseNode<'a>,
}

/// One labeled node of the parse result.
///
/// This is the grammar's output, not the AST: a record of optional tagged
/// payloads where each recognized construct populates a characteristic
/// subset of fields. The transform pass pattern-matches on which fields are
/// present to build typed AST nodes, and rejects any combination it has no
/// rule for.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct ParseNode<'a> {
    pub(crate) template_content: Option<Cow<'a, str>>,
    pub(crate) comment: Option<&'a str>,
    pub(crate) str_content: Option<&'a str>,
    pub(crate) parameter_name: Option<&'a str>,
    pub(crate) named_parameter: Option<Box<NamedParameter<'a>>>,
    pub(crate) replaced_unsafe_item: Option<&'a str>,
    pub(crate) replaced_safe_item: Option<&'a str>,
    pub(crate) unsafe_helper_name: Option<&'a str>,
    pub(crate) safe_helper_name: Option<&'a str>,
    pub(crate) helper_name: Option<&'a str>,
    pub(crate) raw_helper_name: Option<&'a str>,
    pub(crate) partial_name: Option<&'a str>,
    pub(crate) parameters: Option<Vec<ParseNode<'a>>>,
    pub(crate) as_parameters: Option<Vec<&'a str>>,
    pub(crate) arguments: Option<Vec<(&'a str, ParseNode<'a>)>>,
    pub(crate) block_items: Option<Vec<ParseNode<'a>>>,
    pub(crate) else_block_items: Option<Vec<ParseNode<'a>>>,
    pub(crate) else_options: Option<Collapse>,
    pub(crate) close_options: Option<Collapse>,
    pub(crate) collapse_before: bool,
    pub(crate) collapse_after: bool,
}

#[derive(Clone, Copy)]
struct Snapshot {
    pos: usize,
    line: usize,
    line_start_pos: usize,
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// The starting location of the current line
    line_start_pos: usize,
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '.' | '?' | '-')
}

fn is_directory_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '?' | '-' | '/')
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
        }
    }

    #[inline]
    fn current_column(&self) -> usize {
        self.pos - self.line_start_pos + 1
    }

    #[inline]
    fn make_error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            line: self.line,
            column: self.current_column(),
            kind,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            pos: self.pos,
            line: self.line,
            line_start_pos: self.line_start_pos,
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.pos = snapshot.pos;
        self.line = snapshot.line;
        self.line_start_pos = snapshot.line_start_pos;
    }

    /// Advances the parser position by char_len bytes, correctly handling
    /// multi-byte characters. Updates line and column numbers if a newline is
    /// encountered.
    #[inline]
    fn advance_by_char(&mut self, current_char: char, char_len: usize) {
        if current_char == '\n' {
            self.line += 1;
            self.line_start_pos = self.pos + char_len;
        }
        self.pos += char_len;
    }

    /// Advances the parser position by `len` bytes.
    /// This method assumes that the consumed string does NOT contain newlines.
    /// If it can, line/column tracking will be incorrect. Used for fixed delimiters.
    #[inline]
    fn advance_bytes_no_newline(&mut self, len: usize) {
        self.pos += len;
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn next_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    /// Peek if the remaining input starts with `s`
    fn peek(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    /// Consume `s` if the remaining input starts with it.
    /// Assumes `s` does not contain newlines.
    fn consume(&mut self, s: &str) -> bool {
        if self.peek(s) {
            self.advance_bytes_no_newline(s.len());
            true
        } else {
            false
        }
    }

    /// Consume whitespace inside a tag, handling newlines correctly.
    fn consume_whitespace(&mut self) {
        while let Some(c) = self.next_char() {
            if c.is_ascii_whitespace() {
                self.advance_by_char(c, c.len_utf8());
            } else {
                break;
            }
        }
    }

    /// Expect `s` to be the start of the remaining input, consume it or return Err.
    /// Assumes `s` does not contain newlines.
    fn expect(&mut self, s: &str) -> ParseResult<()> {
        if self.consume(s) {
            Ok(())
        } else {
            Err(self.make_error(ParseErrorKind::Expected {
                description: format!(
                    "'{}', found '{}'",
                    s,
                    &self.input[self.pos..std::cmp::min(self.pos + s.len() + 10, self.input.len())]
                ),
            }))
        }
    }

    /// Consume and return a path expression: an optional leading `@`,
    /// repeated `../` segments, then identifier characters (which include
    /// `.` separators). `else` is reserved and rejected as a bare path.
    fn consume_path(&mut self) -> ParseResult<&'a str> {
        self.consume_whitespace();
        let start = self.pos;
        self.consume("@");
        while self.peek("../") {
            self.advance_bytes_no_newline(3);
        }
        while let Some(c) = self.next_char() {
            if is_path_char(c) {
                self.advance_by_char(c, c.len_utf8());
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.make_error(ParseErrorKind::Expected {
                description: "identifier".to_string(),
            }));
        }
        let path = &self.input[start..self.pos];
        if path == "else" {
            return Err(self.make_error(ParseErrorKind::Expected {
                description: "identifier, found reserved word 'else'".to_string(),
            }));
        }
        Ok(path)
    }

    /// Consume a directory-style name, as used for partials. Unlike paths,
    /// these allow `/` separators and no `.`.
    fn consume_directory(&mut self) -> ParseResult<&'a str> {
        self.consume_whitespace();
        let start = self.pos;
        while let Some(c) = self.next_char() {
            if is_directory_char(c) {
                self.advance_by_char(c, c.len_utf8());
            } else {
                break;
            }
        }
        if start == self.pos {
            Err(self.make_error(ParseErrorKind::Expected {
                description: "partial name".to_string(),
            }))
        } else {
            Ok(&self.input[start..self.pos])
        }
    }

    /// Closing half of a `{{ }}` tag: optional whitespace, optional `~`
    /// (collapse-after), then `}}`.
    fn consume_dccurly(&mut self) -> ParseResult<bool> {
        self.consume_whitespace();
        let collapse_after = self.consume("~");
        self.expect("}}")?;
        Ok(collapse_after)
    }

    /// Closing half of a `{{{ }}}` tag.
    fn consume_tccurly(&mut self) -> ParseResult<bool> {
        self.consume_whitespace();
        let collapse_after = self.consume("~");
        self.expect("}}}")?;
        Ok(collapse_after)
    }

    /// True when positioned at `}}` or `~}}` (also covers `}}}`).
    fn at_closing_curly(&self) -> bool {
        self.peek("}}") || self.peek("~}}")
    }

    /// True when the upcoming input is `as |`, which terminates a parameter
    /// list and introduces block-parameter names.
    fn peek_as_parameters(&self) -> bool {
        let rest = &self.input[self.pos..];
        let Some(after) = rest.strip_prefix("as") else {
            return false;
        };
        let trimmed = after.trim_start_matches(|c: char| c.is_ascii_whitespace());
        trimmed.len() < after.len() && trimmed.starts_with('|')
    }

    // --- Literal text ---

    /// Parses a run of literal text until a `{{` delimiter. An escaped
    /// delimiter (`\{{` or `\{{{`) is folded into the text with the
    /// backslash dropped; a lone `{` or `}` is ordinary text.
    fn parse_text(&mut self) -> ParseNode<'a> {
        let start = self.pos;
        let mut owned: Option<String> = None;

        while !self.eof() {
            if self.peek("\\{{") {
                let buf =
                    owned.get_or_insert_with(|| self.input[start..self.pos].to_string());
                self.advance_bytes_no_newline(1); // drop only the backslash
                while self.peek("{") {
                    buf.push('{');
                    self.advance_bytes_no_newline(1);
                }
                continue;
            }
            if self.peek("{{") {
                break;
            }
            // Safe due to !eof()
            let c = self.next_char().unwrap();
            if let Some(buf) = owned.as_mut() {
                buf.push(c);
            }
            self.advance_by_char(c, c.len_utf8());
        }

        let content = match owned {
            Some(s) => Cow::Owned(s),
            None => Cow::Borrowed(&self.input[start..self.pos]),
        };
        ParseNode {
            template_content: Some(content),
            ..Default::default()
        }
    }

    // --- Tags ---

    fn parse_item(&mut self) -> ParseResult<ParseNode<'a>> {
        if self.peek("{{{{") {
            self.parse_raw_block()
        } else if self.peek("{{{") {
            self.parse_safe_tag()
        } else if self.peek("{{") {
            self.parse_tag()
        } else {
            Ok(self.parse_text())
        }
    }

    /// Parses any tag opened with exactly `{{`.
    fn parse_tag(&mut self) -> ParseResult<ParseNode<'a>> {
        self.expect("{{")?;
        let collapse_before = self.consume("~");

        if self.consume("!") {
            return self.parse_comment(collapse_before);
        }
        if self.consume("#") {
            if self.consume(">") {
                return self.parse_block_partial(collapse_before);
            }
            return self.parse_block_helper(collapse_before);
        }
        if self.consume(">") {
            return self.parse_partial(collapse_before);
        }
        if self.peek("/") {
            return Err(self.make_error(ParseErrorKind::Expected {
                description: "tag, found close tag with no matching open".to_string(),
            }));
        }

        let name = self.consume_path()?;
        self.consume_whitespace();
        if self.at_closing_curly() {
            let collapse_after = self.consume_dccurly()?;
            return Ok(ParseNode {
                replaced_unsafe_item: Some(name),
                collapse_before,
                collapse_after,
                ..Default::default()
            });
        }

        let parameters = self.parse_parameters()?;
        let collapse_after = self.consume_dccurly()?;
        Ok(ParseNode {
            unsafe_helper_name: Some(name),
            parameters,
            collapse_before,
            collapse_after,
            ..Default::default()
        })
    }

    /// Parses a `{{{ }}}` tag: an unescaped replacement or helper call.
    fn parse_safe_tag(&mut self) -> ParseResult<ParseNode<'a>> {
        self.expect("{{{")?;
        let collapse_before = self.consume("~");

        let name = self.consume_path()?;
        self.consume_whitespace();
        if self.peek("}}}") || self.peek("~}}}") {
            let collapse_after = self.consume_tccurly()?;
            return Ok(ParseNode {
                replaced_safe_item: Some(name),
                collapse_before,
                collapse_after,
                ..Default::default()
            });
        }

        let parameters = self.parse_parameters()?;
        let collapse_after = self.consume_tccurly()?;
        Ok(ParseNode {
            safe_helper_name: Some(name),
            parameters,
            collapse_before,
            collapse_after,
            ..Default::default()
        })
    }

    fn parse_comment(&mut self, collapse_before: bool) -> ParseResult<ParseNode<'a>> {
        self.consume_whitespace();
        let start = self.pos;
        while !self.eof() && !self.peek("}}") && !self.peek("~}}") {
            // Safe due to !eof()
            let c = self.next_char().unwrap();
            self.advance_by_char(c, c.len_utf8());
        }
        let content = &self.input[start..self.pos];
        let collapse_after = self.consume("~");
        self.expect("}}")?;
        Ok(ParseNode {
            comment: Some(content),
            collapse_before,
            collapse_after,
            ..Default::default()
        })
    }

    // --- Parameters ---

    /// Parses a whitespace-separated parameter list, stopping before the
    /// closing delimiter, a `)`, or an `as |...|` clause. Returns `None`
    /// when no parameters are present.
    fn parse_parameters(&mut self) -> ParseResult<Option<Vec<ParseNode<'a>>>> {
        let mut parameters = Vec::new();
        loop {
            self.consume_whitespace();
            if self.eof()
                || self.at_closing_curly()
                || self.peek(")")
                || self.peek_as_parameters()
            {
                break;
            }
            parameters.push(self.parse_parameter()?);
        }
        if parameters.is_empty() {
            Ok(None)
        } else {
            Ok(Some(parameters))
        }
    }

    /// A single parameter: a quoted string, a parenthesized sub-expression,
    /// a named `key=value` argument, or a plain path.
    fn parse_parameter(&mut self) -> ParseResult<ParseNode<'a>> {
        self.consume_whitespace();

        if self.peek("'") || self.peek("\"") {
            return self.parse_string_literal();
        }

        if self.consume("(") {
            let name = self.consume_path()?;
            let parameters = self.parse_parameters()?;
            self.consume_whitespace();
            self.expect(")")?;
            return Ok(ParseNode {
                safe_helper_name: Some(name),
                parameters,
                ..Default::default()
            });
        }

        let name = self.consume_path()?;

        // A `=` after the name makes this a named (hash) argument.
        let snapshot = self.snapshot();
        self.consume_whitespace();
        if self.consume("=") {
            self.consume_whitespace();
            let value = self.parse_parameter()?;
            return Ok(ParseNode {
                named_parameter: Some(Box::new(NamedParameter { key: name, value })),
                ..Default::default()
            });
        }
        self.restore(snapshot);

        Ok(ParseNode {
            parameter_name: Some(name),
            ..Default::default()
        })
    }

    fn parse_string_literal(&mut self) -> ParseResult<ParseNode<'a>> {
        let quote = if self.consume("'") {
            '\''
        } else {
            self.expect("\"")?;
            '"'
        };
        let start = self.pos;
        while let Some(c) = self.next_char() {
            if c == quote {
                break;
            }
            self.advance_by_char(c, c.len_utf8());
        }
        let content = &self.input[start..self.pos];
        if self.eof() {
            return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(format!(
                "closing {}",
                quote
            )))));
        }
        self.advance_bytes_no_newline(quote.len_utf8());
        Ok(ParseNode {
            str_content: Some(content),
            ..Default::default()
        })
    }

    /// Parses the `key=value` argument list of a partial reference.
    fn parse_arguments(&mut self) -> ParseResult<Option<Vec<(&'a str, ParseNode<'a>)>>> {
        let mut arguments = Vec::new();
        loop {
            self.consume_whitespace();
            if self.eof() || self.at_closing_curly() {
                break;
            }
            let key = self.consume_path()?;
            self.consume_whitespace();
            self.expect("=")?;
            self.consume_whitespace();
            let value = self.parse_parameter()?;
            arguments.push((key, value));
        }
        if arguments.is_empty() {
            Ok(None)
        } else {
            Ok(Some(arguments))
        }
    }

    // --- Partials ---

    fn parse_partial(&mut self, collapse_before: bool) -> ParseResult<ParseNode<'a>> {
        let name = self.consume_directory()?;
        let arguments = self.parse_arguments()?;
        let collapse_after = self.consume_dccurly()?;
        Ok(ParseNode {
            partial_name: Some(name),
            arguments,
            collapse_before,
            collapse_after,
            ..Default::default()
        })
    }

    /// `{{#> name}} fallback {{/name}}`: a partial reference carrying a
    /// fallback body. The close tag must repeat the opening name.
    fn parse_block_partial(&mut self, collapse_before: bool) -> ParseResult<ParseNode<'a>> {
        let name = self.consume_directory()?;
        let arguments = self.parse_arguments()?;
        let collapse_after = self.consume_dccurly()?;

        let body = self.parse_block_body(name, false)?;
        Ok(ParseNode {
            partial_name: Some(name),
            arguments,
            block_items: Some(body.items),
            close_options: Some(body.close_options),
            collapse_before,
            collapse_after,
            ..Default::default()
        })
    }

    // --- Block helpers ---

    fn parse_block_helper(&mut self, collapse_before: bool) -> ParseResult<ParseNode<'a>> {
        self.consume_whitespace();
        let name = if self.consume("*inline") {
            "*inline"
        } else {
            self.consume_path()?
        };

        let parameters = self.parse_parameters()?;
        let as_parameters = self.parse_as_parameters()?;
        let collapse_after = self.consume_dccurly()?;

        // The close tag repeats the open name, minus any leading `*`.
        let close_name = name.trim_start_matches('*');
        let body = self.parse_block_body(close_name, true)?;

        Ok(ParseNode {
            helper_name: Some(name),
            parameters,
            as_parameters,
            block_items: Some(body.items),
            else_block_items: body.else_items,
            else_options: body.else_options,
            close_options: Some(body.close_options),
            collapse_before,
            collapse_after,
            ..Default::default()
        })
    }

    /// `as |name1 name2|` block-parameter declarations.
    fn parse_as_parameters(&mut self) -> ParseResult<Option<Vec<&'a str>>> {
        self.consume_whitespace();
        if !self.peek_as_parameters() {
            return Ok(None);
        }
        self.expect("as")?;
        self.consume_whitespace();
        self.expect("|")?;
        let mut names = Vec::new();
        loop {
            self.consume_whitespace();
            if self.consume("|") {
                break;
            }
            if self.eof() {
                return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(
                    "closing | for block parameters".to_string(),
                ))));
            }
            names.push(self.consume_path()?);
        }
        Ok(Some(names))
    }

    /// Parses block items up to the matching `{{/name}}` close tag,
    /// splitting at an optional `{{else}}` / `{{^}}` separator.
    fn parse_block_body(&mut self, close_name: &str, allow_else: bool) -> ParseResult<BlockBody<'a>> {
        let mut items = Vec::new();
        let mut else_items: Option<Vec<ParseNode<'a>>> = None;
        let mut else_options = None;

        loop {
            if self.eof() {
                return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(format!(
                    "{{{{/{}}}}}",
                    close_name
                )))));
            }

            if self.at_close_tag() {
                let close_options = self.consume_close_tag(close_name)?;
                return Ok(BlockBody {
                    items,
                    else_items,
                    else_options,
                    close_options,
                });
            }

            if allow_else && else_items.is_none() {
                if let Some(options) = self.try_consume_else_tag() {
                    else_items = Some(Vec::new());
                    else_options = Some(options);
                    continue;
                }
            }

            let node = self.parse_item()?;
            match else_items.as_mut() {
                Some(e) => e.push(node),
                None => items.push(node),
            }
        }
    }

    fn at_close_tag(&self) -> bool {
        self.peek("{{/") || self.peek("{{~/")
    }

    /// Consumes a `{{/name}}` close tag, requiring the name captured at
    /// open time; anything else is an unmatched-block error.
    fn consume_close_tag(&mut self, expected: &str) -> ParseResult<Collapse> {
        self.expect("{{")?;
        let before = self.consume("~");
        self.expect("/")?;
        self.consume_whitespace();
        let start = self.pos;
        while let Some(c) = self.next_char() {
            if is_path_char(c) || c == '/' {
                self.advance_by_char(c, c.len_utf8());
            } else {
                break;
            }
        }
        let found = &self.input[start..self.pos];
        if found != expected {
            return Err(self.make_error(ParseErrorKind::UnmatchedBlock {
                open_name: expected.to_string(),
                close_name: found.to_string(),
            }));
        }
        let after = self.consume_dccurly()?;
        Ok(Collapse { before, after })
    }

    /// Attempts to consume `{{else}}` or `{{^}}` (with optional `~` on
    /// either side), restoring the parser position on failure.
    fn try_consume_else_tag(&mut self) -> Option<Collapse> {
        let snapshot = self.snapshot();
        if !self.consume("{{") {
            return None;
        }
        let before = self.consume("~");
        self.consume_whitespace();
        let matched = if self.consume("^") {
            true
        } else if self.consume("else") {
            // `else` must be a whole word, not a prefix of an identifier.
            match self.next_char() {
                Some(c) => c.is_ascii_whitespace() || c == '~' || c == '}',
                None => false,
            }
        } else {
            false
        };
        if !matched {
            self.restore(snapshot);
            return None;
        }
        match self.consume_dccurly() {
            Ok(after) => Some(Collapse { before, after }),
            Err(_) => {
                self.restore(snapshot);
                None
            }
        }
    }

    // --- Raw blocks ---

    /// `{{{{name}}}} ... {{{{/name}}}}`: the body is captured verbatim with
    /// no nested-tag interpretation.
    fn parse_raw_block(&mut self) -> ParseResult<ParseNode<'a>> {
        self.expect("{{{{")?;
        let name = self.consume_path()?;
        let parameters = self.parse_parameters()?;
        self.consume_whitespace();
        self.expect("}}}}")?;

        let start = self.pos;
        while !self.eof() && !self.peek("{{{{/") {
            // Safe due to !eof()
            let c = self.next_char().unwrap();
            self.advance_by_char(c, c.len_utf8());
        }
        if self.eof() {
            return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(format!(
                "{{{{{{{{/{}}}}}}}}}",
                name
            )))));
        }
        let content = &self.input[start..self.pos];

        self.expect("{{{{/")?;
        self.consume_whitespace();
        let close_start = self.pos;
        while let Some(c) = self.next_char() {
            if is_path_char(c) {
                self.advance_by_char(c, c.len_utf8());
            } else {
                break;
            }
        }
        let found = &self.input[close_start..self.pos];
        if found != name {
            return Err(self.make_error(ParseErrorKind::UnmatchedBlock {
                open_name: name.to_string(),
                close_name: found.to_string(),
            }));
        }
        self.consume_whitespace();
        self.expect("}}}}")?;

        let body = ParseNode {
            template_content: Some(Cow::Borrowed(content)),
            ..Default::default()
        };
        Ok(ParseNode {
            raw_helper_name: Some(name),
            parameters,
            block_items: Some(vec![body]),
            ..Default::default()
        })
    }
}

struct BlockBody<'a> {
    items: Vec<ParseNode<'a>>,
    else_items: Option<Vec<ParseNode<'a>>>,
    else_options: Option<Collapse>,
    close_options: Collapse,
}

/// Parses a template into its labeled parse result (the root carries the
/// top-level `block_items`). Fails with a position-carrying [`ParseError`]
/// when the input does not match the grammar.
pub(crate) fn parse(input: &str) -> Result<ParseNode<'_>, ParseError> {
    let mut parser = Parser::new(input);
    let mut items = Vec::new();
    while !parser.eof() {
        let node = parser.parse_item()?;
        if node.template_content.as_deref() == Some("") {
            continue;
        }
        items.push(node);
    }
    Ok(ParseNode {
        block_items: Some(items),
        ..Default::default()
    })
}
