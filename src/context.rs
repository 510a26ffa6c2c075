use std::collections::BTreeMap;

use crate::engine::MinibarsEngine;
use crate::error::{MinibarsError, MinibarsResult};
use crate::value::Value;

/// How deep partial expansion may nest before a render aborts with
/// [`MinibarsError::RecursionLimit`]. Guards against self-including
/// partials without exhausting the call stack.
const MAX_PARTIAL_DEPTH: usize = 100;

/// Per-render evaluation state: the root data value, a layer of local
/// bindings that shadow it, and any partials declared during this render.
///
/// A `Context` belongs to exactly one render. Its local-binding layer is
/// mutated in place as blocks open and close, so it must never be shared
/// across concurrent renders; the engine it references may be.
pub struct Context<'e> {
    engine: &'e MinibarsEngine,
    data: Value,
    locals: BTreeMap<String, Value>,
    local_partials: BTreeMap<String, String>,
    partial_depth: usize,
}

impl<'e> Context<'e> {
    pub(crate) fn new(engine: &'e MinibarsEngine, data: Value) -> Self {
        Context {
            engine,
            data,
            locals: BTreeMap::new(),
            local_partials: BTreeMap::new(),
            partial_depth: 0,
        }
    }

    pub(crate) fn engine(&self) -> &'e MinibarsEngine {
        self.engine
    }

    /// Resolves a path expression to a value, or [`Value::Null`] when any
    /// segment fails to resolve.
    ///
    /// Literal tokens short-circuit before any lookup: `true`, `false`,
    /// `nil`/`null`/`undefined`, and numbers evaluate to themselves. For
    /// everything else the path splits into segments at `.` and `/` (with
    /// `../` kept whole and a leading `@` reattached to the first named
    /// segment), resolution starting from the local layer when it holds the
    /// first segment, else from the root data.
    #[must_use]
    pub fn get(&self, path: &str) -> Value {
        if let Some(literal) = parse_literal(path) {
            return literal;
        }

        let segments = split_path(path);
        let Some(first) = segments.first() else {
            return Value::Null;
        };

        let mut current = if let Some(local) = self.locals.get(first.as_str()) {
            local.clone()
        } else {
            match self.data.index_str(first) {
                Some(v) => v.clone(),
                None => return Value::Null,
            }
        };

        for segment in &segments[1..] {
            match current.index_str(segment) {
                Some(next) => current = next.clone(),
                None => return Value::Null,
            }
        }
        current
    }

    /// Binds a name in the local layer for the remainder of the render
    /// (or until a temporary scope restores it).
    pub fn add_item(&mut self, key: impl Into<String>, value: Value) {
        self.locals.insert(key.into(), value);
    }

    pub fn add_items(&mut self, items: BTreeMap<String, Value>) {
        for (key, value) in items {
            self.add_item(key, value);
        }
    }

    /// Installs `bindings` in the local layer, runs `body`, then restores
    /// exactly the prior state of every bound key. Restoration happens on
    /// the error path too, so a failing body cannot leak scope.
    pub fn with_temporary_context<T>(
        &mut self,
        bindings: BTreeMap<String, Value>,
        body: impl FnOnce(&mut Self) -> MinibarsResult<T>,
    ) -> MinibarsResult<T> {
        let saved: Vec<(String, Option<Value>)> = bindings
            .keys()
            .map(|key| (key.clone(), self.locals.get(key).cloned()))
            .collect();

        self.add_items(bindings);
        let result = body(self);

        for (key, previous) in saved {
            match previous {
                Some(value) => {
                    self.locals.insert(key, value);
                }
                None => {
                    self.locals.remove(&key);
                }
            }
        }
        result
    }

    /// Runs `body` with the current local layer saved under the reserved
    /// key `../`, so one level of parent traversal works from inside a
    /// narrowed scope. With no locals yet, the parent is the root data.
    pub fn with_nested_context<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> MinibarsResult<T>,
    ) -> MinibarsResult<T> {
        let saved = self.locals.get("../").cloned();
        let parent = if self.locals.is_empty() {
            self.data.clone()
        } else {
            Value::Map(self.locals.clone())
        };
        self.locals.insert("../".to_string(), parent);

        let result = body(self);

        match saved {
            Some(value) => {
                self.locals.insert("../".to_string(), value);
            }
            None => {
                self.locals.remove("../");
            }
        }
        result
    }

    /// Registers a partial visible only to this render, as declared by an
    /// inline-partial block. Shadows any engine-registered partial of the
    /// same name. The stored text is already rendered and is emitted
    /// verbatim on reference.
    pub fn register_local_partial(&mut self, name: impl Into<String>, content: String) {
        self.local_partials.insert(name.into(), content);
    }

    /// Scoped variant of [`register_local_partial`]: the binding (used for
    /// `@partial-block`) lasts only for the duration of `body`.
    ///
    /// [`register_local_partial`]: Context::register_local_partial
    pub(crate) fn with_local_partial<T>(
        &mut self,
        name: &str,
        content: String,
        body: impl FnOnce(&mut Self) -> MinibarsResult<T>,
    ) -> MinibarsResult<T> {
        let saved = self.local_partials.insert(name.to_string(), content);
        let result = body(self);
        match saved {
            Some(previous) => {
                self.local_partials.insert(name.to_string(), previous);
            }
            None => {
                self.local_partials.remove(name);
            }
        }
        result
    }

    /// Renders the named partial in this context, or returns `None` when
    /// it is registered neither locally nor on the engine. The caller
    /// decides whether that is an error or a fallback situation.
    pub(crate) fn render_partial(&mut self, name: &str) -> MinibarsResult<Option<String>> {
        if self.partial_depth >= MAX_PARTIAL_DEPTH {
            return Err(MinibarsError::RecursionLimit {
                partial_name: name.to_string(),
            });
        }

        if let Some(content) = self.local_partials.get(name) {
            return Ok(Some(content.clone()));
        }

        let Some(compiled) = self.engine.get_partial(name)? else {
            return Ok(None);
        };

        self.partial_depth += 1;
        let result = compiled.render(self);
        self.partial_depth -= 1;
        result.map(Some)
    }
}

/// Literal path tokens that evaluate to themselves without any lookup.
fn parse_literal(path: &str) -> Option<Value> {
    match path {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "nil" | "null" | "undefined" => return Some(Value::Null),
        _ => {}
    }
    if let Ok(n) = path.parse::<i64>() {
        return Some(Value::Int(n));
    }
    if let Ok(f) = path.parse::<f64>() {
        // `nan`/`inf`/`infinity` parse as floats but stay ordinary keys.
        if f.is_finite() {
            return Some(Value::Float(f));
        }
    }
    None
}

/// Splits a path at `.` and `/`, keeping `../` as a whole segment. A
/// leading `@` that ends up alone (as in `@../key`) is reattached to the
/// final named segment so special variables stay single segments.
fn split_path(path: &str) -> Vec<String> {
    let mut segments: Vec<String> = Vec::new();
    let mut rest = path;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("../") {
            segments.push("../".to_string());
            rest = tail;
            continue;
        }
        if let Some(tail) = rest.strip_prefix(['.', '/']) {
            rest = tail;
            continue;
        }
        let end = rest.find(['.', '/']).unwrap_or(rest.len());
        segments.push(rest[..end].to_string());
        rest = &rest[end..];
    }

    if segments.first().map(String::as_str) == Some("@") && segments.len() > 1 {
        segments.remove(0);
        if let Some(last) = segments.last_mut() {
            *last = format!("@{last}");
        }
    }
    segments
}
