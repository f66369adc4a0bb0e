use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tera::{Tera, Value};

use crate::collect::{AssetCollector, CollectError, CollectionOptions};

/// Wires an [`AssetCollector`] into a tera engine.
///
/// For every configured kind `k` this registers two template functions:
///
/// - `k(path=...)` declares one asset. In bundle mode it returns an empty
///   string; in direct mode it returns the rendered inline markup (pipe it
///   through `| safe` in autoescaped templates).
/// - `get_k_bundle()` returns the bundle accumulated so far and resets the
///   kind's state.
///
/// Declarations land in the order the render reaches them, so an included
/// partial's assets appear where the `{% include %}` sits and a parent
/// template's assets come before the blocks a child fills in.
///
/// The collector is shared behind a mutex and assumes one render at a time;
/// interleaving declares from concurrent renders on the same extension
/// corrupts the collected order. For render-pass isolation, construct a
/// fresh extension and register it on a per-render clone of the engine.
pub struct CollectionExtension {
    kinds: Vec<String>,
    collector: Arc<Mutex<AssetCollector>>,
}

impl CollectionExtension {
    pub fn new(options: CollectionOptions) -> Result<Self, CollectError> {
        let kinds = options.kinds.clone();
        let collector = Arc::new(Mutex::new(AssetCollector::new(options)?));

        Ok(Self { kinds, collector })
    }

    /// Register the declare and bundle functions for every kind.
    pub fn register(&self, tera: &mut Tera) {
        for kind in &self.kinds {
            tera.register_function(kind, declare_fn(kind.clone(), Arc::clone(&self.collector)));
            tera.register_function(
                &format!("get_{}_bundle", kind),
                bundle_fn(kind.clone(), Arc::clone(&self.collector)),
            );
        }
        debug!("registered collection functions for kinds {:?}", self.kinds);
    }

    /// Shared handle to the underlying collector, for host code that wants
    /// to read bundles outside of template rendering.
    pub fn collector(&self) -> Arc<Mutex<AssetCollector>> {
        Arc::clone(&self.collector)
    }
}

fn declare_fn(
    kind: String,
    collector: Arc<Mutex<AssetCollector>>,
) -> impl Fn(&HashMap<String, Value>) -> tera::Result<Value> + Send + Sync {
    move |args| {
        let value = args
            .get("path")
            .cloned()
            .ok_or_else(|| tera::Error::msg(format!("`{}` requires a `path` argument", kind)))?;

        let mut collector = collector
            .lock()
            .map_err(|_| tera::Error::msg("asset collector lock poisoned"))?;

        let markup = collector
            .declare(&kind, value)
            .map_err(|e| tera::Error::msg(e.to_string()))?;

        Ok(Value::String(markup.unwrap_or_default()))
    }
}

fn bundle_fn(
    kind: String,
    collector: Arc<Mutex<AssetCollector>>,
) -> impl Fn(&HashMap<String, Value>) -> tera::Result<Value> + Send + Sync {
    move |_args| {
        let mut collector = collector
            .lock()
            .map_err(|_| tera::Error::msg("asset collector lock poisoned"))?;

        collector
            .bundle(&kind)
            .map_err(|e| tera::Error::msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::{value_text, MarkupTemplate};
    use serde_json::json;
    use tera::Context;

    fn joining_options() -> CollectionOptions {
        CollectionOptions {
            bundler: Arc::new(|_kind, collection| {
                Value::String(
                    collection
                        .iter()
                        .map(value_text)
                        .collect::<Vec<_>>()
                        .join(","),
                )
            }),
            ..CollectionOptions::default()
        }
    }

    #[test]
    fn test_include_order_is_render_order() {
        let ext = CollectionExtension::new(CollectionOptions::default()).unwrap();
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("head", "{{ css(path=\"base.css\") }}{{ js(path=\"vendor.js\") }}"),
            ("page", "{% include \"head\" %}{{ css(path=\"page.css\") }}"),
        ])
        .unwrap();
        ext.register(&mut tera);

        let out = tera.render("page", &Context::new()).unwrap();
        assert_eq!(out, "");

        let handle = ext.collector();
        let mut collector = handle.lock().unwrap();
        assert_eq!(
            collector.bundle("css").unwrap(),
            json!(["base.css", "page.css"])
        );
        assert_eq!(collector.bundle("js").unwrap(), json!(["vendor.js"]));
    }

    #[test]
    fn test_parent_assets_precede_child_blocks() {
        let ext = CollectionExtension::new(joining_options()).unwrap();
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (
                "layout",
                "{{ css(path=\"layout.css\") }}{% block assets %}{% endblock assets %}<head>{{ get_css_bundle() }}</head>",
            ),
            (
                "article",
                "{% extends \"layout\" %}{% block assets %}{{ css(path=\"article.css\") }}{% endblock assets %}",
            ),
        ])
        .unwrap();
        ext.register(&mut tera);

        let out = tera.render("article", &Context::new()).unwrap();
        assert_eq!(out, "<head>layout.css,article.css</head>");
    }

    #[test]
    fn test_bundle_read_resets_within_template() {
        let ext = CollectionExtension::new(joining_options()).unwrap();
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![(
            "page",
            "{{ css(path=\"a.css\") }}{{ css(path=\"b.css\") }}{{ get_css_bundle() }}|{{ get_css_bundle() }}",
        )])
        .unwrap();
        ext.register(&mut tera);

        let out = tera.render("page", &Context::new()).unwrap();
        assert_eq!(out, "a.css,b.css|");
    }

    #[test]
    fn test_sequential_renders_start_clean() {
        let ext = CollectionExtension::new(joining_options()).unwrap();
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![(
            "page",
            "{{ css(path=\"a.css\") }}{{ get_css_bundle() }}",
        )])
        .unwrap();
        ext.register(&mut tera);

        assert_eq!(tera.render("page", &Context::new()).unwrap(), "a.css");
        assert_eq!(tera.render("page", &Context::new()).unwrap(), "a.css");
    }

    #[test]
    fn test_direct_mode_renders_inline() {
        let mut options = CollectionOptions {
            use_bundle: false,
            ..CollectionOptions::default()
        };
        options.templates.insert(
            "css".to_string(),
            MarkupTemplate::Format("<link rel=\"stylesheet\" href=\"/%s\">".to_string()),
        );

        let ext = CollectionExtension::new(options).unwrap();
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![("page", "{{ css(path=\"a.css\") }}")])
            .unwrap();
        ext.register(&mut tera);

        let out = tera.render("page", &Context::new()).unwrap();
        assert_eq!(out, "<link rel=\"stylesheet\" href=\"/a.css\">");

        // Nothing accumulated for a later bundle read.
        let handle = ext.collector();
        let mut collector = handle.lock().unwrap();
        assert_eq!(collector.bundle("css").unwrap(), json!([]));
    }

    #[test]
    fn test_declare_without_path_fails_render() {
        let ext = CollectionExtension::new(CollectionOptions::default()).unwrap();
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![("page", "{{ css() }}")]).unwrap();
        ext.register(&mut tera);

        assert!(tera.render("page", &Context::new()).is_err());
    }
}
