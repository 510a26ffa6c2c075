use crate::context::Context;
use crate::error::{MinibarsError, MinibarsResult};
use crate::escape::escape_value;
use crate::helper::{self, CollapseHints};
use crate::value::Value;

/// Whitespace-control flags carried by a single tag, derived from `~`
/// markers adjacent to its delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Collapse {
    /// Strip trailing whitespace from the preceding sibling's output.
    pub before: bool,
    /// Strip leading whitespace from the following sibling's output.
    pub after: bool,
}

/// A single argument of a helper call or partial reference.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Param {
    /// A path expression, resolved against the context at call time.
    Path(String),
    /// A quoted string literal.
    Literal(String),
    /// A named `key=value` argument, collected into the hash bundle.
    Named(String, Box<Param>),
    /// A parenthesized sub-expression, evaluated before being passed.
    SubExpression(HelperCall),
}

impl Param {
    /// Evaluates a positional argument to a value. Named arguments do not
    /// reach this path; the protocol layer collects them separately.
    pub(crate) fn eval(&self, ctx: &mut Context<'_>) -> MinibarsResult<Value> {
        match self {
            Param::Path(path) => Ok(ctx.get(path)),
            Param::Literal(text) => Ok(Value::String(text.clone())),
            Param::Named(_, value) => value.eval(ctx),
            Param::SubExpression(call) => eval_inline_helper(call, ctx),
        }
    }
}

/// An inline or block helper invocation before block/else attachment.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HelperCall {
    pub(crate) name: String,
    pub(crate) params: Vec<Param>,
}

/// A `{{#name ...}} ... {{/name}}` construct.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BlockHelperCall {
    pub(crate) call: HelperCall,
    pub(crate) as_names: Vec<String>,
    pub(crate) block: Block,
    pub(crate) else_block: Option<Block>,
    pub(crate) collapse: Collapse,
    pub(crate) else_collapse: Option<Collapse>,
    pub(crate) close_collapse: Collapse,
}

/// A `{{> name}}` or `{{#> name}} ... {{/name}}` reference.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PartialCall {
    pub(crate) name: String,
    pub(crate) args: Vec<(String, Param)>,
    /// Body of a partial-block form, rendered before invocation and
    /// exposed to the target as `@partial-block`.
    pub(crate) fallback: Option<Block>,
    pub(crate) collapse: Collapse,
    pub(crate) close_collapse: Option<Collapse>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AstNode {
    /// Literal template text, emitted unchanged.
    Text { content: String },
    /// A comment; renders to nothing but still carries its text and
    /// collapse flags.
    Comment { text: String, collapse: Collapse },
    /// `{{path}}`: resolve and HTML-escape.
    EscapedReplacement { path: String, collapse: Collapse },
    /// `{{{path}}}`: resolve without escaping.
    Replacement { path: String, collapse: Collapse },
    /// `{{name args}}`: inline helper call, output escaped.
    EscapedHelper { call: HelperCall, collapse: Collapse },
    /// `{{{name args}}}`: inline helper call, output unescaped.
    Helper { call: HelperCall, collapse: Collapse },
    BlockHelper(Box<BlockHelperCall>),
    Partial(Box<PartialCall>),
}

impl AstNode {
    /// The collapse-before flag the enclosing block consults for this node.
    fn collapse_before(&self) -> bool {
        match self {
            AstNode::Text { .. } => false,
            AstNode::Comment { collapse, .. }
            | AstNode::EscapedReplacement { collapse, .. }
            | AstNode::Replacement { collapse, .. }
            | AstNode::EscapedHelper { collapse, .. }
            | AstNode::Helper { collapse, .. } => collapse.before,
            AstNode::BlockHelper(node) => node.collapse.before,
            AstNode::Partial(node) => node.collapse.before,
        }
    }

    /// The collapse-after flag the *following sibling* should observe. For
    /// constructs with a close tag this is the close tag's flag, so `~`
    /// just inside the block is distinguished from `~` after it.
    fn collapse_after(&self) -> bool {
        match self {
            AstNode::Text { .. } => false,
            AstNode::Comment { collapse, .. }
            | AstNode::EscapedReplacement { collapse, .. }
            | AstNode::Replacement { collapse, .. }
            | AstNode::EscapedHelper { collapse, .. }
            | AstNode::Helper { collapse, .. } => collapse.after,
            AstNode::BlockHelper(node) => node.close_collapse.after,
            AstNode::Partial(node) => node.close_collapse.unwrap_or(node.collapse).after,
        }
    }

    fn eval(&self, ctx: &mut Context<'_>) -> MinibarsResult<Value> {
        match self {
            AstNode::Text { content } => Ok(Value::String(content.clone())),
            AstNode::Comment { .. } => Ok(Value::String(String::new())),
            AstNode::EscapedReplacement { path, .. } => {
                let value = eval_replacement(path, ctx)?;
                Ok(Value::Safe(escape_value(ctx.engine().escaper(), &value)))
            }
            AstNode::Replacement { path, .. } => eval_replacement(path, ctx),
            AstNode::EscapedHelper { call, .. } => {
                let value = eval_inline_helper(call, ctx)?;
                Ok(Value::Safe(escape_value(ctx.engine().escaper(), &value)))
            }
            AstNode::Helper { call, .. } => eval_inline_helper(call, ctx),
            AstNode::BlockHelper(node) => eval_block_helper(node, ctx),
            AstNode::Partial(node) => eval_partial(node, ctx),
        }
    }
}

/// A sequence of sibling nodes. Rendering is the seam where whitespace
/// control happens: siblings evaluate strictly left to right, and each
/// rendered piece is trimmed against its neighbours' collapse flags.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Block {
    pub(crate) items: Vec<AstNode>,
}

impl Block {
    pub(crate) fn render(&self, ctx: &mut Context<'_>) -> MinibarsResult<String> {
        let mut pieces = Vec::with_capacity(self.items.len());
        for (i, item) in self.items.iter().enumerate() {
            let mut text = item.eval(ctx)?.to_string();
            if i > 0 && self.items[i - 1].collapse_after() {
                text = text.trim_start().to_string();
            }
            if let Some(next) = self.items.get(i + 1) {
                if next.collapse_before() {
                    text = text.trim_end().to_string();
                }
            }
            pieces.push(text);
        }
        Ok(pieces.concat())
    }
}

/// `{{path}}`: a zero-argument helper of that name wins over a plain
/// context lookup.
fn eval_replacement(path: &str, ctx: &mut Context<'_>) -> MinibarsResult<Value> {
    if let Some(helper_fn) = ctx.engine().get_helper(path) {
        return helper::apply(
            helper_fn.as_ref(),
            ctx,
            path,
            &[],
            &[],
            None,
            None,
            CollapseHints::default(),
        );
    }
    Ok(ctx.get(path))
}

pub(crate) fn eval_inline_helper(
    call: &HelperCall,
    ctx: &mut Context<'_>,
) -> MinibarsResult<Value> {
    dispatch_helper(ctx, &call.name, &call.params, &[], None, None, CollapseHints::default())
}

fn eval_block_helper(node: &BlockHelperCall, ctx: &mut Context<'_>) -> MinibarsResult<Value> {
    let hints = CollapseHints {
        helper: node.collapse,
        else_tag: node.else_collapse,
        close: Some(node.close_collapse),
    };
    dispatch_helper(
        ctx,
        &node.call.name,
        &node.call.params,
        &node.as_names,
        Some(&node.block),
        node.else_block.as_ref(),
        hints,
    )
}

/// Resolves a helper name and applies it. An unregistered name is probed
/// against the context: a truthy value re-dispatches the tag as `with`
/// (implicit context narrowing); otherwise the `helperMissing` fallback
/// receives the attempted name and raw arguments.
fn dispatch_helper(
    ctx: &mut Context<'_>,
    name: &str,
    params: &[Param],
    as_names: &[String],
    block: Option<&Block>,
    else_block: Option<&Block>,
    hints: CollapseHints,
) -> MinibarsResult<Value> {
    let helper_fn = if as_names.is_empty() {
        ctx.engine().get_helper(name)
    } else {
        ctx.engine().get_as_helper(name)
    };
    if let Some(helper_fn) = helper_fn {
        return helper::apply(
            helper_fn.as_ref(),
            ctx,
            name,
            params,
            as_names,
            block,
            else_block,
            hints,
        );
    }

    let probed = ctx.get(name);
    if probed.is_truthy() {
        if let Some(with_fn) = ctx.engine().get_helper("with") {
            return helper::apply_resolved(
                with_fn.as_ref(),
                ctx,
                name,
                vec![probed],
                std::collections::BTreeMap::new(),
                &[],
                block,
                else_block,
                hints,
            );
        }
    }

    match ctx.engine().get_helper("helperMissing") {
        Some(missing_fn) => helper::apply(
            missing_fn.as_ref(),
            ctx,
            name,
            params,
            &[],
            block,
            else_block,
            hints,
        ),
        None => Err(MinibarsError::UnknownHelper {
            helper_name: name.to_string(),
        }),
    }
}

/// Binds any `key=value` arguments into scope, then invokes the target
/// partial. A body makes this a partial-block: the body is rendered first
/// and exposed under `@partial-block`; if the target is unregistered the
/// rendered body doubles as the fallback output.
fn eval_partial(node: &PartialCall, ctx: &mut Context<'_>) -> MinibarsResult<Value> {
    let mut bindings = Vec::with_capacity(node.args.len());
    for (key, param) in &node.args {
        let value = param.eval(ctx)?;
        bindings.push((key.clone(), value));
    }
    for (key, value) in bindings {
        ctx.add_item(key, value);
    }

    let fallback = match &node.fallback {
        Some(block) => Some(block.render(ctx)?),
        None => None,
    };

    match fallback {
        Some(body) => ctx.with_local_partial("@partial-block", body.clone(), |ctx| {
            match ctx.render_partial(&node.name)? {
                Some(output) => Ok(Value::String(output)),
                None => Ok(Value::String(body)),
            }
        }),
        None => match ctx.render_partial(&node.name)? {
            Some(output) => Ok(Value::String(output)),
            None => Err(MinibarsError::MissingPartial {
                partial_name: node.name.clone(),
            }),
        },
    }
}
