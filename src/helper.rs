use std::collections::BTreeMap;

use crate::ast::{Block, Collapse, Param};
use crate::context::Context;
use crate::error::MinibarsResult;
use crate::value::Value;

/// The whitespace-control flags a block helper may consult when trimming
/// its own output: those of the opening tag, the `{{else}}` separator, and
/// the close tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollapseHints {
    pub helper: Collapse,
    pub else_tag: Option<Collapse>,
    pub close: Option<Collapse>,
}

/// A registered helper callable. Receives the call surroundings through
/// [`HelperOptions`] and the evaluated positional arguments in source
/// order; returns the value the tag evaluates to.
pub type HelperFn =
    dyn Fn(&mut HelperOptions<'_, '_>, &[Value]) -> MinibarsResult<Value> + Send + Sync;

/// Everything about a helper invocation other than its positional
/// arguments: the invoked name, the sorted hash arguments, the blocks (for
/// block form), collapse hints, and the evaluation context.
pub struct HelperOptions<'a, 'e> {
    pub(crate) ctx: &'a mut Context<'e>,
    name: &'a str,
    hash: BTreeMap<String, Value>,
    pub(crate) block: Option<&'a Block>,
    pub(crate) else_block: Option<&'a Block>,
    as_names: &'a [String],
    collapse: CollapseHints,
}

impl<'e> HelperOptions<'_, 'e> {
    /// The name the template invoked; for the missing-helper fallback this
    /// is the attempted name, not `helperMissing`.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// Named (`key=value`) arguments, keyed deterministically.
    #[must_use]
    pub fn hash(&self) -> &BTreeMap<String, Value> {
        &self.hash
    }

    /// Block-parameter names declared with `as |...|`.
    #[must_use]
    pub fn as_names(&self) -> &[String] {
        self.as_names
    }

    #[must_use]
    pub fn has_block(&self) -> bool {
        self.block.is_some()
    }

    #[must_use]
    pub fn has_else(&self) -> bool {
        self.else_block.is_some()
    }

    #[must_use]
    pub fn collapse(&self) -> CollapseHints {
        self.collapse
    }

    /// Renders the main block against the current context. An inline call
    /// has no block and renders empty.
    pub fn render_block(&mut self) -> MinibarsResult<String> {
        match self.block {
            Some(block) => block.render(self.ctx),
            None => Ok(String::new()),
        }
    }

    /// Renders the else branch, empty if the tag has none.
    pub fn render_else(&mut self) -> MinibarsResult<String> {
        match self.else_block {
            Some(block) => block.render(self.ctx),
            None => Ok(String::new()),
        }
    }

    /// The evaluation context, for helpers that look up data or manage
    /// scoped bindings themselves.
    pub fn context(&mut self) -> &mut Context<'e> {
        self.ctx
    }

    /// Renders the main block with temporary bindings installed, restoring
    /// scope afterwards.
    pub fn render_block_with(
        &mut self,
        bindings: BTreeMap<String, Value>,
    ) -> MinibarsResult<String> {
        match self.block {
            Some(block) => self
                .ctx
                .with_temporary_context(bindings, |ctx| block.render(ctx)),
            None => Ok(String::new()),
        }
    }
}

/// Applies a helper to unevaluated arguments: positional parameters are
/// evaluated in source order, named parameters are split off into the hash
/// bundle, then the callable runs.
pub(crate) fn apply(
    helper_fn: &HelperFn,
    ctx: &mut Context<'_>,
    name: &str,
    params: &[Param],
    as_names: &[String],
    block: Option<&Block>,
    else_block: Option<&Block>,
    collapse: CollapseHints,
) -> MinibarsResult<Value> {
    let mut positional = Vec::with_capacity(params.len());
    let mut hash = BTreeMap::new();
    for param in params {
        match param {
            Param::Named(key, value) => {
                hash.insert(key.clone(), value.eval(ctx)?);
            }
            Param::Path(_) | Param::Literal(_) | Param::SubExpression(_) => {
                positional.push(param.eval(ctx)?);
            }
        }
    }
    apply_resolved(
        helper_fn, ctx, name, positional, hash, as_names, block, else_block, collapse,
    )
}

/// Invokes the callable with already-evaluated arguments. Used by [`apply`]
/// and by re-dispatch paths that already hold values rather than argument
/// expressions.
pub(crate) fn apply_resolved(
    helper_fn: &HelperFn,
    ctx: &mut Context<'_>,
    name: &str,
    positional: Vec<Value>,
    hash: BTreeMap<String, Value>,
    as_names: &[String],
    block: Option<&Block>,
    else_block: Option<&Block>,
    collapse: CollapseHints,
) -> MinibarsResult<Value> {
    let mut options = HelperOptions {
        ctx,
        name,
        hash,
        block,
        else_block,
        as_names,
        collapse,
    };
    helper_fn(&mut options, &positional)
}
