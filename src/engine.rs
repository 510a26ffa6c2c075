use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ast::Block;
use crate::error::MinibarsResult;
use crate::escape::{Escaper, HtmlEscaper};
use crate::helper::{HelperFn, HelperOptions};
use crate::helpers;
use crate::template::Template;
use crate::value::Value;
use crate::{parser, transform};

/// A partial's raw source plus its lazily-compiled form. Compilation
/// happens on first use, so registration never fails; a syntax error in a
/// partial surfaces from the render that first references it.
struct PartialEntry {
    source: String,
    compiled: Option<Arc<Block>>,
}

/// The engine owns every registry a render consults: helpers, as-helpers,
/// partials, and the escaping strategy.
///
/// Registration happens through `&mut self` before rendering starts; a
/// configured engine is then safe to render from on multiple threads at
/// once, with each render holding its own context. The partial registry
/// sits behind a lock only because lazy partial compilation memoizes
/// through a shared reference.
///
/// # Examples
///
/// ```
/// use minibars::{MinibarsEngine, Value};
///
/// let engine = MinibarsEngine::new();
/// let template = engine.compile("Hello, {{name}}!").unwrap();
///
/// let data = Value::from_iter([("name", "World")]);
/// assert_eq!(template.render(data).unwrap(), "Hello, World!");
/// ```
pub struct MinibarsEngine {
    helpers: BTreeMap<String, Arc<HelperFn>>,
    as_helpers: BTreeMap<String, Arc<HelperFn>>,
    partials: RwLock<BTreeMap<String, PartialEntry>>,
    escaper: Box<dyn Escaper + Send + Sync>,
}

impl MinibarsEngine {
    /// Creates an engine with the built-in control helpers and the default
    /// HTML escaper.
    #[must_use]
    pub fn new() -> Self {
        let mut engine = Self {
            helpers: BTreeMap::new(),
            as_helpers: BTreeMap::new(),
            partials: RwLock::new(BTreeMap::new()),
            escaper: Box::new(HtmlEscaper::new()),
        };
        helpers::register_default_helpers(&mut engine);
        engine
    }

    /// Compiles a template into a handle bound to this engine.
    ///
    /// # Errors
    ///
    /// Fails with [`MinibarsError::Parse`] when the template source does
    /// not match the grammar.
    ///
    /// [`MinibarsError::Parse`]: crate::MinibarsError::Parse
    pub fn compile(&self, template: &str) -> MinibarsResult<Template<'_>> {
        Ok(Template::new(self, self.template_to_ast(template)?))
    }

    /// Registers (or replaces) a helper reachable from `{{name ...}}` and
    /// `{{#name ...}}` tags.
    pub fn register_helper<F>(&mut self, name: impl Into<String>, helper: F)
    where
        F: Fn(&mut HelperOptions<'_, '_>, &[Value]) -> MinibarsResult<Value>
            + Send
            + Sync
            + 'static,
    {
        self.helpers.insert(name.into(), Arc::new(helper));
    }

    /// Registers a helper for the `{{#name ... as |x|}}` form, resolved
    /// through a registry separate from plain helpers.
    pub fn register_as_helper<F>(&mut self, name: impl Into<String>, helper: F)
    where
        F: Fn(&mut HelperOptions<'_, '_>, &[Value]) -> MinibarsResult<Value>
            + Send
            + Sync
            + 'static,
    {
        self.as_helpers.insert(name.into(), Arc::new(helper));
    }

    /// Registers (or replaces) a partial by source text. The source is not
    /// parsed here; compilation is deferred to first use.
    pub fn register_partial(&mut self, name: impl Into<String>, content: impl Into<String>) {
        let mut partials = match self.partials.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        partials.insert(
            name.into(),
            PartialEntry {
                source: content.into(),
                compiled: None,
            },
        );
    }

    /// Replaces the escaping strategy used by `{{ }}` output.
    pub fn set_escaper<E: Escaper + Send + Sync + 'static>(&mut self, escaper: E) {
        self.escaper = Box::new(escaper);
    }

    /// Escapes a string with this engine's configured strategy, for
    /// helpers that assemble their own markup.
    #[must_use]
    pub fn escape_expression(&self, expression: &str) -> String {
        self.escaper.escape(expression)
    }

    pub(crate) fn escaper(&self) -> &dyn Escaper {
        self.escaper.as_ref()
    }

    pub(crate) fn get_helper(&self, name: &str) -> Option<Arc<HelperFn>> {
        self.helpers.get(name).map(Arc::clone)
    }

    pub(crate) fn get_as_helper(&self, name: &str) -> Option<Arc<HelperFn>> {
        self.as_helpers.get(name).map(Arc::clone)
    }

    /// Fetches a partial's compiled form, compiling and memoizing it on
    /// first use. Returns `None` for an unregistered name.
    ///
    /// Compilation runs outside the lock; when two renders race on the
    /// same uncompiled partial both produce the identical result and one
    /// wins the memoization, so a half-initialized entry is never visible.
    pub(crate) fn get_partial(&self, name: &str) -> MinibarsResult<Option<Arc<Block>>> {
        let source = {
            let partials = self.read_partials();
            match partials.get(name) {
                None => return Ok(None),
                Some(entry) => match &entry.compiled {
                    Some(compiled) => return Ok(Some(Arc::clone(compiled))),
                    None => entry.source.clone(),
                },
            }
        };

        let compiled = Arc::new(self.template_to_ast(&source)?);

        let mut partials = self.write_partials();
        match partials.get_mut(name) {
            Some(entry) => match &entry.compiled {
                Some(existing) => Ok(Some(Arc::clone(existing))),
                None => {
                    entry.compiled = Some(Arc::clone(&compiled));
                    Ok(Some(compiled))
                }
            },
            // Unregistered between the two locks; the compiled form is
            // still valid for this render.
            None => Ok(Some(compiled)),
        }
    }

    fn template_to_ast(&self, content: &str) -> MinibarsResult<Block> {
        let parsed = parser::parse(content)?;
        transform::to_ast(parsed)
    }

    fn read_partials(&self) -> RwLockReadGuard<'_, BTreeMap<String, PartialEntry>> {
        match self.partials.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_partials(&self) -> RwLockWriteGuard<'_, BTreeMap<String, PartialEntry>> {
        match self.partials.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MinibarsEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MinibarsError;

    #[test]
    #[ntest::timeout(100)]
    fn test_compile_rejects_bad_syntax() {
        let engine = MinibarsEngine::new();
        let err = engine.compile("{{#if x}}oops").unwrap_err();
        assert!(matches!(err, MinibarsError::Parse(_)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_partial_compiles_lazily() {
        let mut engine = MinibarsEngine::new();
        engine.register_partial("broken", "{{#if x}}");

        // Registration accepted the bad source; the error surfaces on use.
        let template = engine.compile("{{> broken}}").unwrap();
        let err = template.render(Value::Null).unwrap_err();
        assert!(matches!(err, MinibarsError::Parse(_)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_partial_memoized_after_first_use() {
        let mut engine = MinibarsEngine::new();
        engine.register_partial("p", "hi {{name}}");
        assert!(engine.get_partial("p").unwrap().is_some());

        let first = engine.get_partial("p").unwrap().unwrap();
        let second = engine.get_partial("p").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unregistered_partial_is_none() {
        let engine = MinibarsEngine::new();
        assert!(engine.get_partial("ghost").unwrap().is_none());
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_configured_engine_renders_concurrently() {
        let mut engine = MinibarsEngine::new();
        engine.register_partial("row", "[{{this}}]");
        let engine = std::sync::Arc::new(engine);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = std::sync::Arc::clone(&engine);
                std::thread::spawn(move || {
                    let template = engine.compile("{{#each items}}{{> row}}{{/each}}").unwrap();
                    let data = Value::from_iter([("items", Value::from(vec![1i64, 2, 3]))]);
                    template.render(data).unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), "[1][2][3]");
        }
    }
}
