use crate::ast::Block;
use crate::context::Context;
use crate::engine::MinibarsEngine;
use crate::error::MinibarsResult;
use crate::value::Value;

/// A compiled template, bound to the engine that compiled it.
///
/// Rendering evaluates the stored AST against a fresh [`Context`] over the
/// supplied data, consulting the engine for helpers, partials, and the
/// escaping strategy. A handle can be rendered any number of times, with
/// different data each time.
///
/// # Example
///
/// ```rust
/// use minibars::{MinibarsEngine, Value};
///
/// let engine = MinibarsEngine::new();
/// let template = engine.compile("<p>{{firstname}} {{lastname}}</p>").unwrap();
///
/// let data = Value::from_iter([
///     ("firstname", "Yehuda"),
///     ("lastname", "Katz"),
/// ]);
/// assert_eq!(template.render(data).unwrap(), "<p>Yehuda Katz</p>");
/// ```
pub struct Template<'e> {
    engine: &'e MinibarsEngine,
    root: Block,
}

impl std::fmt::Debug for Template<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The engine is a registry bundle with no useful Debug output of
        // its own; show the compiled tree.
        f.debug_struct("Template")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl<'e> Template<'e> {
    pub(crate) fn new(engine: &'e MinibarsEngine, root: Block) -> Self {
        Template { engine, root }
    }

    /// Renders the template against `data`.
    ///
    /// # Errors
    ///
    /// Propagates any evaluation failure: an unknown helper, a missing
    /// partial, a non-iterable value handed to `each`, a partial whose
    /// deferred compilation fails, or a partial recursion overflow.
    pub fn render(&self, data: impl Into<Value>) -> MinibarsResult<String> {
        let mut ctx = Context::new(self.engine, data.into());
        self.root.render(&mut ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MinibarsError;

    fn render(template: &str, data: Value) -> MinibarsResult<String> {
        let engine = MinibarsEngine::new();
        let compiled = engine.compile(template)?;
        compiled.render(data)
    }

    fn people() -> Value {
        Value::from_iter([(
            "people",
            Value::from(vec![
                Value::from_iter([("name", "Nils")]),
                Value::from_iter([("name", "Yehuda")]),
            ]),
        )])
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_debug_shows_compiled_tree() {
        let engine = MinibarsEngine::new();
        let compiled = engine.compile("{{name}}").unwrap();
        let debugged = format!("{compiled:?}");
        assert!(debugged.starts_with("Template"), "got: {debugged}");
        assert!(debugged.contains("name"), "got: {debugged}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_identity_render() {
        assert_eq!(
            render("plain text, no tags", Value::Null).unwrap(),
            "plain text, no tags"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_simple_replacement() {
        let data = Value::from_iter([("name", "Tom")]);
        assert_eq!(render("Hi {{name}}!", data).unwrap(), "Hi Tom!");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escaped_vs_unescaped() {
        let data = Value::from_iter([("body", "<b>\"hi\" & 'bye'</b>")]);
        assert_eq!(
            render("{{body}}", data.clone()).unwrap(),
            "&lt;b&gt;&quot;hi&quot; &amp; &#39;bye&#39;&lt;/b&gt;"
        );
        assert_eq!(render("{{{body}}}", data).unwrap(), "<b>\"hi\" & 'bye'</b>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_safe_value_bypasses_escaping() {
        let data = Value::from_iter([("body", Value::safe("<b>ok</b>"))]);
        assert_eq!(render("{{body}}", data).unwrap(), "<b>ok</b>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_missing_value_renders_empty() {
        assert_eq!(render("a{{missing}}b", Value::Null).unwrap(), "ab");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_comment_renders_nothing() {
        assert_eq!(render("a{{! ignore me }}b", Value::Null).unwrap(), "ab");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_literal_paths() {
        assert_eq!(render("{{true}}/{{false}}", Value::Null).unwrap(), "true/false");
        assert_eq!(render("{{42}} {{2.5}}", Value::Null).unwrap(), "42 2.5");
        assert_eq!(render("[{{null}}{{undefined}}]", Value::Null).unwrap(), "[]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_if_else() {
        let template = "{{#if active}}on{{else}}off{{/if}}";
        assert_eq!(
            render(template, Value::from_iter([("active", true)])).unwrap(),
            "on"
        );
        assert_eq!(
            render(template, Value::from_iter([("active", false)])).unwrap(),
            "off"
        );
        assert_eq!(render(template, Value::Null).unwrap(), "off");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unless() {
        let template = "{{#unless done}}pending{{/unless}}";
        assert_eq!(render(template, Value::Null).unwrap(), "pending");
        assert_eq!(
            render(template, Value::from_iter([("done", true)])).unwrap(),
            ""
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_collections_are_falsy() {
        let template = "{{#if items}}some{{else}}none{{/if}}";
        let data = Value::from_iter([("items", Value::Array(vec![]))]);
        assert_eq!(render(template, data).unwrap(), "none");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_whitespace_collapse_around_if() {
        assert_eq!(
            render("foo {{~#if true~}}  bar  {{~/if~}} baz", Value::Null).unwrap(),
            "foobarbaz"
        );
        assert_eq!(
            render("foo {{#if true}}  bar  {{/if}} baz", Value::Null).unwrap(),
            "foo   bar   baz"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_collapse_on_replacement() {
        let data = Value::from_iter([("name", "Tom")]);
        assert_eq!(render("a  {{~name~}}  b", data).unwrap(), "aTomb");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_each_over_array() {
        assert_eq!(
            render("{{#each people}}{{name}} {{/each}}", people()).unwrap(),
            "Nils Yehuda "
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_each_specials() {
        let template = "{{#each people}}{{@index}}:{{@key}}:{{name}}:{{#if @first}}F{{/if}}{{#if @last}}L{{/if}};{{/each}}";
        assert_eq!(render(template, people()).unwrap(), "0:0:Nils:F;1:1:Yehuda:L;");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_each_as_binding() {
        assert_eq!(
            render("{{#each people as |p|}}{{p.name}};{{/each}}", people()).unwrap(),
            "Nils;Yehuda;"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_each_over_map_binds_key() {
        let data = Value::from_iter([(
            "scores",
            Value::from_iter([("alice", 3i64), ("bob", 5i64)]),
        )]);
        assert_eq!(
            render("{{#each scores}}{{@key}}={{this}};{{/each}}", data).unwrap(),
            "alice=3;bob=5;"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_each_empty_renders_else() {
        let template = "{{#each items}}x{{else}}empty{{/each}}";
        let data = Value::from_iter([("items", Value::Array(vec![]))]);
        assert_eq!(render(template, data).unwrap(), "empty");
        assert_eq!(render(template, Value::Null).unwrap(), "empty");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_each_rejects_scalars() {
        let data = Value::from_iter([("items", 12i64)]);
        let err = render("{{#each items}}x{{/each}}", data).unwrap_err();
        assert!(matches!(err, MinibarsError::UnknownEachType { ref found } if found == "number"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_each_parent_traversal() {
        let data = Value::from_iter([
            ("prefix", Value::from("- ")),
            ("items", Value::from(vec!["a", "b"])),
        ]);
        assert_eq!(
            render("{{#each items}}{{../prefix}}{{this}}\n{{/each}}", data).unwrap(),
            "- a\n- b\n"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_with_narrowing() {
        let data = Value::from_iter([(
            "person",
            Value::from_iter([("firstname", "Nils"), ("lastname", "Frahm")]),
        )]);
        assert_eq!(
            render("{{#with person}}{{firstname}} {{lastname}}{{/with}}", data).unwrap(),
            "Nils Frahm"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_with_missing_renders_else() {
        assert_eq!(
            render("{{#with person}}x{{else}}nobody{{/with}}", Value::Null).unwrap(),
            "nobody"
        );
        assert_eq!(render("{{#with person}}x{{/with}}", Value::Null).unwrap(), "");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_implicit_with_narrowing() {
        // No helper named `person`, but the path resolves to a truthy
        // value, so the tag narrows context like `with`.
        let data = Value::from_iter([(
            "person",
            Value::from_iter([("name", "Ada")]),
        )]);
        assert_eq!(render("{{#person}}{{name}}{{/person}}", data).unwrap(), "Ada");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unknown_block_name_fails() {
        let err = render("{{#ghost}}x{{/ghost}}", Value::Null).unwrap_err();
        assert!(matches!(err, MinibarsError::UnknownHelper { ref helper_name } if helper_name == "ghost"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unknown_inline_helper_fails() {
        let err = render("{{loud name}}", Value::Null).unwrap_err();
        assert!(matches!(err, MinibarsError::UnknownHelper { ref helper_name } if helper_name == "loud"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_lookup() {
        let data = Value::from_iter([
            ("items", Value::from(vec!["zero", "one"])),
            ("map", Value::from_iter([("k", "v")])),
        ]);
        assert_eq!(render("{{lookup items 1}}", data.clone()).unwrap(), "one");
        assert_eq!(render("{{lookup map 'k'}}", data.clone()).unwrap(), "v");
        assert_eq!(render("[{{lookup items 9}}]", data).unwrap(), "[]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_raw_block_output_is_verbatim() {
        assert_eq!(
            render("{{{{raw}}}} {{not interpreted}} {{{{/raw}}}}", Value::Null).unwrap(),
            " {{not interpreted}} "
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_custom_helper() {
        let mut engine = MinibarsEngine::new();
        engine.register_helper("loud", |_opts, args| {
            Ok(Value::String(
                args.first().cloned().unwrap_or_default().to_string().to_uppercase(),
            ))
        });
        let template = engine.compile("{{firstname}} {{loud lastname}}").unwrap();
        let data = Value::from_iter([("firstname", "Yehuda"), ("lastname", "Katz")]);
        assert_eq!(template.render(data).unwrap(), "Yehuda KATZ");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_helper_output_is_escaped_only_in_double_stache() {
        let mut engine = MinibarsEngine::new();
        engine.register_helper("tagged", |_opts, args| {
            Ok(Value::String(format!(
                "<i>{}</i>",
                args.first().cloned().unwrap_or_default()
            )))
        });
        let data = Value::from_iter([("name", "x")]);
        let escaped = engine.compile("{{tagged name}}").unwrap();
        assert_eq!(escaped.render(data.clone()).unwrap(), "&lt;i&gt;x&lt;/i&gt;");
        let unescaped = engine.compile("{{{tagged name}}}").unwrap();
        assert_eq!(unescaped.render(data).unwrap(), "<i>x</i>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_zero_argument_helper_wins_over_lookup() {
        let mut engine = MinibarsEngine::new();
        engine.register_helper("now", |_opts, _args| Ok(Value::from("noon")));
        let data = Value::from_iter([("now", "midnight")]);
        let template = engine.compile("{{now}}").unwrap();
        assert_eq!(template.render(data).unwrap(), "noon");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_hash_arguments_sorted() {
        let mut engine = MinibarsEngine::new();
        engine.register_helper("attrs", |opts, _args| {
            let rendered: Vec<String> = opts
                .hash()
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            Ok(Value::String(rendered.join(" ")))
        });
        let template = engine
            .compile("{{attrs z='last' a='first' m='mid'}}")
            .unwrap();
        assert_eq!(
            template.render(Value::Null).unwrap(),
            "a=first m=mid z=last"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_sub_expression_evaluates_inner_first() {
        let mut engine = MinibarsEngine::new();
        engine.register_helper("upper", |_opts, args| {
            Ok(Value::String(
                args.first().cloned().unwrap_or_default().to_string().to_uppercase(),
            ))
        });
        engine.register_helper("wrap", |_opts, args| {
            Ok(Value::String(format!(
                "({})",
                args.first().cloned().unwrap_or_default()
            )))
        });
        let template = engine.compile("{{wrap (upper name)}}").unwrap();
        let data = Value::from_iter([("name", "ada")]);
        assert_eq!(template.render(data).unwrap(), "(ADA)");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_string_parameters() {
        let mut engine = MinibarsEngine::new();
        engine.register_helper("echo", |_opts, args| {
            Ok(args.first().cloned().unwrap_or_default())
        });
        let template = engine.compile("{{echo 'hi there'}}").unwrap();
        assert_eq!(template.render(Value::Null).unwrap(), "hi there");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_partial_rendering() {
        let mut engine = MinibarsEngine::new();
        engine.register_partial("greeting", "Hello {{name}}");
        let template = engine.compile("{{> greeting}}!").unwrap();
        let data = Value::from_iter([("name", "Tom")]);
        assert_eq!(template.render(data).unwrap(), "Hello Tom!");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_partial_with_arguments() {
        let mut engine = MinibarsEngine::new();
        engine.register_partial("fav", "favorite: {{parameter}}");
        let template = engine.compile("{{> fav parameter=favoriteNumber}}").unwrap();
        let data = Value::from_iter([("favoriteNumber", 7i64)]);
        assert_eq!(template.render(data).unwrap(), "favorite: 7");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_missing_partial_fails() {
        let engine = MinibarsEngine::new();
        let template = engine.compile("{{> ghost}}").unwrap();
        let err = template.render(Value::Null).unwrap_err();
        assert!(matches!(err, MinibarsError::MissingPartial { ref partial_name } if partial_name == "ghost"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_partial_block_fallback() {
        let engine = MinibarsEngine::new();
        let template = engine
            .compile("{{#> ghost}}Failover content{{/ghost}}")
            .unwrap();
        assert_eq!(template.render(Value::Null).unwrap(), "Failover content");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_partial_block_content() {
        let mut engine = MinibarsEngine::new();
        engine.register_partial("layout", "Site Content {{> @partial-block}}");
        let template = engine.compile("{{#> layout}}My Content{{/layout}}").unwrap();
        assert_eq!(template.render(Value::Null).unwrap(), "Site Content My Content");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_inline_partial() {
        let engine = MinibarsEngine::new();
        let template = engine
            .compile("{{#*inline \"myPartial\"}}My Content\n{{/inline}}{{#each people}}{{> myPartial}}{{/each}}")
            .unwrap();
        assert_eq!(template.render(people()).unwrap(), "My Content\nMy Content\n");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_inline_partials_inside_partial_block() {
        let mut engine = MinibarsEngine::new();
        engine.register_partial("layout", "<nav>{{> nav}}</nav><main>{{> content}}</main>");
        let template = engine
            .compile(
                "{{#> layout}}{{#*inline \"nav\"}}My Nav{{/inline}}{{#*inline \"content\"}}My Content{{/inline}}{{/layout}}",
            )
            .unwrap();
        assert_eq!(
            template.render(Value::Null).unwrap(),
            "<nav>My Nav</nav><main>My Content</main>"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_self_including_partial_hits_recursion_limit() {
        let mut engine = MinibarsEngine::new();
        engine.register_partial("loop", "x{{> loop}}");
        let template = engine.compile("{{> loop}}").unwrap();
        let err = template.render(Value::Null).unwrap_err();
        assert!(matches!(err, MinibarsError::RecursionLimit { ref partial_name } if partial_name == "loop"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escaped_delimiters_render_literally() {
        assert_eq!(
            render("\\{{name}} is a tag", Value::from_iter([("name", "x")])).unwrap(),
            "{{name}} is a tag"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_deterministic_output_for_map_data() {
        let data = Value::from_iter([(
            "scores",
            Value::from_iter([("b", 2i64), ("a", 1i64), ("c", 3i64)]),
        )]);
        let first = render("{{#each scores}}{{@key}}{{/each}}", data.clone()).unwrap();
        let second = render("{{#each scores}}{{@key}}{{/each}}", data).unwrap();
        assert_eq!(first, "abc");
        assert_eq!(first, second);
    }
}
