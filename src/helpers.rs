//! The built-in control helpers every engine starts with. Hosts may
//! override any of them (including `helperMissing`) by registering a
//! helper of the same name.

use std::collections::BTreeMap;

use crate::ast::Block;
use crate::context::Context;
use crate::engine::MinibarsEngine;
use crate::error::{MinibarsError, MinibarsResult};
use crate::helper::HelperOptions;
use crate::value::Value;

pub(crate) fn register_default_helpers(engine: &mut MinibarsEngine) {
    engine.register_helper("if", helper_if);
    engine.register_helper("unless", helper_unless);
    engine.register_helper("each", helper_each);
    engine.register_helper("with", helper_with);
    engine.register_helper("lookup", helper_lookup);
    engine.register_helper("helperMissing", helper_missing);
    engine.register_helper("*inline", helper_inline_partial);
    engine.register_helper("raw", helper_raw);

    // `each` and `with` also handle the `as |name|` form, which resolves
    // through the separate as-helper registry.
    engine.register_as_helper("each", helper_each);
    engine.register_as_helper("with", helper_with);
}

/// Shared branch logic for `if` and `unless`: render the chosen branch,
/// then trim it per the enclosing tag's own collapse hints so `{{~#if}}`
/// style markers act inside the block as well as outside.
fn conditional_branch(opts: &mut HelperOptions<'_, '_>, condition: bool) -> MinibarsResult<Value> {
    let hints = opts.collapse();
    let result = if condition {
        let mut text = opts.render_block()?;
        if hints.helper.after {
            text = text.trim_start().to_string();
        }
        let trailing = if opts.has_else() {
            hints.else_tag
        } else {
            hints.close
        };
        if trailing.is_some_and(|c| c.before) {
            text = text.trim_end().to_string();
        }
        text
    } else if opts.has_else() {
        let mut text = opts.render_else()?;
        if hints.else_tag.is_some_and(|c| c.after) {
            text = text.trim_start().to_string();
        }
        if hints.close.is_some_and(|c| c.before) {
            text = text.trim_end().to_string();
        }
        text
    } else {
        String::new()
    };
    Ok(Value::String(result))
}

fn helper_if(opts: &mut HelperOptions<'_, '_>, args: &[Value]) -> MinibarsResult<Value> {
    let condition = args.first().is_some_and(Value::is_truthy);
    conditional_branch(opts, condition)
}

fn helper_unless(opts: &mut HelperOptions<'_, '_>, args: &[Value]) -> MinibarsResult<Value> {
    let condition = args.first().is_some_and(Value::is_truthy);
    conditional_branch(opts, !condition)
}

fn helper_each(opts: &mut HelperOptions<'_, '_>, args: &[Value]) -> MinibarsResult<Value> {
    let items = args.first().cloned().unwrap_or_default();
    if items.is_empty() {
        return Ok(Value::String(opts.render_else()?));
    }

    let name = opts
        .as_names()
        .first()
        .cloned()
        .unwrap_or_else(|| "this".to_string());
    let block = opts.block;

    match items {
        Value::Array(elements) => {
            let total = elements.len();
            opts.ctx.with_nested_context(|ctx| {
                let mut output = String::new();
                for (index, element) in elements.iter().enumerate() {
                    let bindings =
                        element_bindings(&name, element, index, total, index.to_string());
                    output.push_str(&render_element(ctx, block, bindings)?);
                }
                Ok(Value::String(output))
            })
        }
        Value::Map(entries) => {
            let total = entries.len();
            opts.ctx.with_nested_context(|ctx| {
                let mut output = String::new();
                for (index, (key, element)) in entries.iter().enumerate() {
                    let bindings = element_bindings(&name, element, index, total, key.clone());
                    output.push_str(&render_element(ctx, block, bindings)?);
                }
                Ok(Value::String(output))
            })
        }
        other => Err(MinibarsError::UnknownEachType {
            found: other.type_name().to_string(),
        }),
    }
}

/// The per-element scope for `each`: the implicit (or `as`-declared) name,
/// the iteration specials, and the element's own fields when it is a
/// mapping, so unqualified access works inside the block.
fn element_bindings(
    name: &str,
    element: &Value,
    index: usize,
    total: usize,
    key: String,
) -> BTreeMap<String, Value> {
    let mut bindings = BTreeMap::new();
    if let Value::Map(fields) = element {
        for (field, value) in fields {
            bindings.insert(field.clone(), value.clone());
        }
    }
    bindings.insert("@index".to_string(), Value::Int(index as i64));
    bindings.insert("@first".to_string(), Value::Bool(index == 0));
    bindings.insert("@last".to_string(), Value::Bool(index + 1 == total));
    bindings.insert("@key".to_string(), Value::String(key));
    bindings.insert(name.to_string(), element.clone());
    bindings
}

fn render_element(
    ctx: &mut Context<'_>,
    block: Option<&Block>,
    bindings: BTreeMap<String, Value>,
) -> MinibarsResult<String> {
    ctx.with_temporary_context(bindings, |ctx| match block {
        Some(block) => block.render(ctx),
        None => Ok(String::new()),
    })
}

fn helper_with(opts: &mut HelperOptions<'_, '_>, args: &[Value]) -> MinibarsResult<Value> {
    let data = args.first().cloned().unwrap_or_default();
    if matches!(data, Value::Null | Value::Bool(false)) {
        return Ok(Value::String(opts.render_else()?));
    }

    let bindings = match (opts.as_names().first(), data) {
        (Some(name), data) => BTreeMap::from([(name.clone(), data)]),
        (None, Value::Map(fields)) => fields,
        (None, data) => BTreeMap::from([("this".to_string(), data)]),
    };

    let block = opts.block;
    opts.ctx.with_nested_context(|ctx| {
        let output = ctx.with_temporary_context(bindings, |ctx| match block {
            Some(block) => block.render(ctx),
            None => Ok(String::new()),
        })?;
        Ok(Value::String(output))
    })
}

fn helper_lookup(opts: &mut HelperOptions<'_, '_>, args: &[Value]) -> MinibarsResult<Value> {
    let result = match (args.first(), args.get(1)) {
        (Some(target), Some(key)) => target.index(key).cloned().unwrap_or_default(),
        _ => Value::Null,
    };

    // Only textual results take part in whitespace collapsing; anything
    // else passes through unmodified.
    let Value::String(mut text) = result else {
        return Ok(result);
    };
    let hints = opts.collapse();
    if hints.helper.after {
        text = text.trim_start().to_string();
    }
    if hints.close.is_some_and(|c| c.before) {
        text = text.trim_end().to_string();
    }
    Ok(Value::String(text))
}

fn helper_missing(opts: &mut HelperOptions<'_, '_>, _args: &[Value]) -> MinibarsResult<Value> {
    Err(MinibarsError::UnknownHelper {
        helper_name: opts.name().to_string(),
    })
}

/// `{{#*inline "name"}}`: the rendered body becomes a partial visible for
/// the rest of this render, shadowing engine-registered partials.
fn helper_inline_partial(
    opts: &mut HelperOptions<'_, '_>,
    args: &[Value],
) -> MinibarsResult<Value> {
    let Some(name) = args.first() else {
        return Ok(Value::Null);
    };
    let name = name.to_string();
    let body = opts.render_block()?;
    opts.context().register_local_partial(name, body);
    Ok(Value::Null)
}

/// `{{{{raw}}}}` blocks dispatch to this helper with their verbatim body
/// as the block content.
fn helper_raw(opts: &mut HelperOptions<'_, '_>, _args: &[Value]) -> MinibarsResult<Value> {
    Ok(Value::String(opts.render_block()?))
}
