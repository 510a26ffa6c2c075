//! The rewrite pass from the grammar's labeled parse result to the typed
//! AST. One rule per recognized field combination; a parse node shaped
//! like nothing this module knows is a grammar/transform mismatch and
//! fails loudly rather than dropping content.

use crate::ast::{AstNode, Block, BlockHelperCall, Collapse, HelperCall, Param, PartialCall};
use crate::error::{MinibarsError, MinibarsResult};
use crate::parser::ParseNode;

/// Converts the root parse result into a renderable [`Block`].
pub(crate) fn to_ast(root: ParseNode<'_>) -> MinibarsResult<Block> {
    let Some(items) = root.block_items else {
        return Err(unrecognized(&root));
    };
    to_block(items)
}

fn to_block(items: Vec<ParseNode<'_>>) -> MinibarsResult<Block> {
    let items = items
        .into_iter()
        .map(to_node)
        .collect::<MinibarsResult<Vec<_>>>()?;
    Ok(Block { items })
}

fn to_node(node: ParseNode<'_>) -> MinibarsResult<AstNode> {
    let collapse = Collapse {
        before: node.collapse_before,
        after: node.collapse_after,
    };

    if let Some(content) = node.template_content {
        return Ok(AstNode::Text {
            content: content.into_owned(),
        });
    }
    if let Some(text) = node.comment {
        return Ok(AstNode::Comment {
            text: text.to_string(),
            collapse,
        });
    }
    if let Some(path) = node.replaced_unsafe_item {
        return Ok(AstNode::EscapedReplacement {
            path: path.to_string(),
            collapse,
        });
    }
    if let Some(path) = node.replaced_safe_item {
        return Ok(AstNode::Replacement {
            path: path.to_string(),
            collapse,
        });
    }
    if let Some(name) = node.unsafe_helper_name {
        let params = to_params(node.parameters)?;
        return Ok(AstNode::EscapedHelper {
            call: HelperCall {
                name: name.to_string(),
                params,
            },
            collapse,
        });
    }
    if let Some(name) = node.safe_helper_name {
        let params = to_params(node.parameters)?;
        return Ok(AstNode::Helper {
            call: HelperCall {
                name: name.to_string(),
                params,
            },
            collapse,
        });
    }
    if let Some(name) = node.helper_name {
        let Some(block_items) = node.block_items else {
            return Err(unrecognized_named(name));
        };
        let Some(close_collapse) = node.close_options else {
            return Err(unrecognized_named(name));
        };
        let params = to_params(node.parameters)?;
        let as_names = node
            .as_parameters
            .unwrap_or_default()
            .into_iter()
            .map(str::to_string)
            .collect();
        let else_block = match node.else_block_items {
            Some(items) => Some(to_block(items)?),
            None => None,
        };
        return Ok(AstNode::BlockHelper(Box::new(BlockHelperCall {
            call: HelperCall {
                name: name.to_string(),
                params,
            },
            as_names,
            block: to_block(block_items)?,
            else_block,
            collapse,
            else_collapse: node.else_options,
            close_collapse,
        })));
    }
    if let Some(name) = node.raw_helper_name {
        let Some(block_items) = node.block_items else {
            return Err(unrecognized_named(name));
        };
        let params = to_params(node.parameters)?;
        return Ok(AstNode::BlockHelper(Box::new(BlockHelperCall {
            call: HelperCall {
                name: name.to_string(),
                params,
            },
            as_names: Vec::new(),
            block: to_block(block_items)?,
            else_block: None,
            collapse: Collapse::default(),
            else_collapse: None,
            close_collapse: Collapse::default(),
        })));
    }
    if let Some(name) = node.partial_name {
        let mut args = Vec::new();
        if let Some(arguments) = node.arguments {
            for (key, value) in arguments {
                args.push((key.to_string(), to_param(value)?));
            }
        }
        let fallback = match node.block_items {
            Some(items) => Some(to_block(items)?),
            None => None,
        };
        return Ok(AstNode::Partial(Box::new(PartialCall {
            name: name.to_string(),
            args,
            fallback,
            collapse,
            close_collapse: node.close_options,
        })));
    }

    Err(unrecognized(&node))
}

fn to_params(parameters: Option<Vec<ParseNode<'_>>>) -> MinibarsResult<Vec<Param>> {
    parameters
        .unwrap_or_default()
        .into_iter()
        .map(to_param)
        .collect()
}

fn to_param(node: ParseNode<'_>) -> MinibarsResult<Param> {
    if let Some(name) = node.parameter_name {
        return Ok(Param::Path(name.to_string()));
    }
    if let Some(content) = node.str_content {
        return Ok(Param::Literal(content.to_string()));
    }
    if let Some(named) = node.named_parameter {
        return Ok(Param::Named(
            named.key.to_string(),
            Box::new(to_param(named.value)?),
        ));
    }
    if let Some(name) = node.safe_helper_name {
        let params = to_params(node.parameters)?;
        return Ok(Param::SubExpression(HelperCall {
            name: name.to_string(),
            params,
        }));
    }
    Err(unrecognized(&node))
}

fn unrecognized(node: &ParseNode<'_>) -> MinibarsError {
    MinibarsError::UnrecognizedAstShape {
        shape: format!("{node:?}"),
    }
}

fn unrecognized_named(name: &str) -> MinibarsError {
    MinibarsError::UnrecognizedAstShape {
        shape: format!("helper {name:?} without a block or close tag"),
    }
}
