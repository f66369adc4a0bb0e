use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Tag kinds collected when none are configured explicitly
pub const DEFAULT_KINDS: &[&str] = &["css", "js"];

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("unknown tag kind '{0}'")]
    UnknownKind(String),
}

/// Hook that packages the accumulated sequence for one kind into a bundle.
/// The default keeps the raw sequence as a JSON array.
pub type BundlerFn = Arc<dyn Fn(&str, Vec<Value>) -> Value + Send + Sync>;

pub type MarkupFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Inline markup for a single declared value in direct mode: either a
/// format string with one `%s` placeholder, or an arbitrary function.
#[derive(Clone)]
pub enum MarkupTemplate {
    Format(String),
    Function(MarkupFn),
}

impl MarkupTemplate {
    pub fn render(&self, value: &Value) -> String {
        match self {
            MarkupTemplate::Format(pattern) => pattern.replacen("%s", &value_text(value), 1),
            MarkupTemplate::Function(render) => render(value),
        }
    }
}

impl fmt::Debug for MarkupTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkupTemplate::Format(pattern) => f.debug_tuple("Format").field(pattern).finish(),
            MarkupTemplate::Function(_) => f.debug_tuple("Function").field(&"..").finish(),
        }
    }
}

/// String form of a declared value as it appears in markup
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Clone)]
pub struct CollectionOptions {
    /// Recognized tag kinds, e.g. `css` and `js`
    pub kinds: Vec<String>,
    /// `true` accumulates declarations for a later bundle read;
    /// `false` renders each declaration inline immediately
    pub use_bundle: bool,
    /// Per-kind inline markup used in direct mode. Kinds without an entry
    /// render as the bare value text.
    pub templates: HashMap<String, MarkupTemplate>,
    pub bundler: BundlerFn,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            kinds: DEFAULT_KINDS.iter().map(|k| (*k).to_string()).collect(),
            use_bundle: true,
            templates: HashMap::new(),
            bundler: Arc::new(|_kind, collection| Value::Array(collection)),
        }
    }
}

impl fmt::Debug for CollectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionOptions")
            .field("kinds", &self.kinds)
            .field("use_bundle", &self.use_bundle)
            .field("templates", &self.templates)
            .finish()
    }
}

/// Accumulates asset declarations per tag kind, in the order the render
/// encounters them, and hands them out as a bundle exactly once.
///
/// Declarations made by included or parent templates land in the position
/// the reference occupies, so render order is presentation order. Entries
/// are never reordered, deduplicated, or sorted. Reading a bundle clears
/// that kind's state, so one long-lived collector stays clean across
/// sequential renders as long as every declared kind gets read.
pub struct AssetCollector {
    options: CollectionOptions,
    collected: HashMap<String, Vec<Value>>,
}

impl AssetCollector {
    /// Fails fast when a configured markup template names an unknown kind.
    pub fn new(options: CollectionOptions) -> Result<Self, CollectError> {
        for kind in options.templates.keys() {
            if !options.kinds.iter().any(|k| k == kind) {
                return Err(CollectError::UnknownKind(kind.clone()));
            }
        }

        let collected = options
            .kinds
            .iter()
            .map(|kind| (kind.clone(), Vec::new()))
            .collect();

        Ok(Self { options, collected })
    }

    pub fn kinds(&self) -> &[String] {
        &self.options.kinds
    }

    pub fn use_bundle(&self) -> bool {
        self.options.use_bundle
    }

    /// Record one declared value for `kind`.
    ///
    /// In bundle mode the value is appended to the kind's sequence and no
    /// markup is produced. In direct mode the kind's markup template is
    /// rendered for this single value and nothing is accumulated.
    pub fn declare(&mut self, kind: &str, value: Value) -> Result<Option<String>, CollectError> {
        if !self.options.use_bundle {
            if !self.options.kinds.iter().any(|k| k == kind) {
                return Err(CollectError::UnknownKind(kind.to_string()));
            }
            let markup = match self.options.templates.get(kind) {
                Some(template) => template.render(&value),
                None => value_text(&value),
            };
            return Ok(Some(markup));
        }

        let entries = self
            .collected
            .get_mut(kind)
            .ok_or_else(|| CollectError::UnknownKind(kind.to_string()))?;
        entries.push(value);
        Ok(None)
    }

    /// Read the accumulated sequence for `kind` through the bundler and
    /// reset that kind to empty. A kind with no declarations yields an
    /// empty bundle.
    pub fn bundle(&mut self, kind: &str) -> Result<Value, CollectError> {
        let entries = self
            .collected
            .get_mut(kind)
            .ok_or_else(|| CollectError::UnknownKind(kind.to_string()))?;

        let data = std::mem::take(entries);
        debug!("bundling {} '{}' entries", data.len(), kind);

        Ok((self.options.bundler)(kind, data))
    }
}

impl fmt::Debug for AssetCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetCollector")
            .field("options", &self.options)
            .field("collected", &self.collected)
            .finish()
    }
}
