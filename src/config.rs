use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::collect::{CollectionOptions, MarkupTemplate, DEFAULT_KINDS};

/// Site configuration from helpers.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSettings {
    #[serde(default = "default_site_url")]
    pub url: String,
}

/// Asset collection configuration from helpers.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectSettings {
    #[serde(default = "default_kinds")]
    pub kinds: Vec<String>,
    #[serde(default = "default_use_bundle")]
    pub use_bundle: bool,
    /// Per-kind direct-mode markup, as format strings with a `%s`
    /// placeholder. Function templates and bundler hooks stay programmatic.
    #[serde(default)]
    pub templates: HashMap<String, String>,
}

/// Complete helpers.yaml structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperSettings {
    #[serde(default)]
    pub site: SiteSettings,
    #[serde(default)]
    pub collect: CollectSettings,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            url: default_site_url(),
        }
    }
}

impl Default for CollectSettings {
    fn default() -> Self {
        Self {
            kinds: default_kinds(),
            use_bundle: default_use_bundle(),
            templates: HashMap::new(),
        }
    }
}

impl Default for HelperSettings {
    fn default() -> Self {
        Self {
            site: SiteSettings::default(),
            collect: CollectSettings::default(),
        }
    }
}

impl CollectSettings {
    pub fn into_options(self) -> CollectionOptions {
        CollectionOptions {
            kinds: self.kinds,
            use_bundle: self.use_bundle,
            templates: self
                .templates
                .into_iter()
                .map(|(kind, pattern)| (kind, MarkupTemplate::Format(pattern)))
                .collect(),
            ..CollectionOptions::default()
        }
    }
}

fn default_site_url() -> String {
    "http://localhost".to_string()
}

fn default_kinds() -> Vec<String> {
    DEFAULT_KINDS.iter().map(|k| (*k).to_string()).collect()
}

fn default_use_bundle() -> bool {
    true
}

pub fn load_settings(path: &Path) -> Result<HelperSettings> {
    if !path.exists() {
        return Ok(HelperSettings::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let settings: HelperSettings = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = HelperSettings::default();
        assert_eq!(settings.site.url, "http://localhost");
        assert_eq!(settings.collect.kinds, vec!["css", "js"]);
        assert!(settings.collect.use_bundle);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let settings = load_settings(Path::new("does-not-exist.yaml")).unwrap();
        assert!(settings.collect.use_bundle);
    }

    #[test]
    fn test_load_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "site:\n  url: https://cds.cern.ch\ncollect:\n  use_bundle: false\n  \
             templates:\n    css: '<link rel=\"stylesheet\" href=\"/%s\">'\n"
        )
        .unwrap();

        let settings = load_settings(file.path()).unwrap();
        assert_eq!(settings.site.url, "https://cds.cern.ch");
        assert!(!settings.collect.use_bundle);
        assert_eq!(
            settings.collect.templates.get("css").unwrap(),
            "<link rel=\"stylesheet\" href=\"/%s\">"
        );
    }

    #[test]
    fn test_into_options_keeps_format_templates() {
        let settings = CollectSettings {
            use_bundle: false,
            templates: [(
                "css".to_string(),
                "<link href=\"%s\">".to_string(),
            )]
            .into_iter()
            .collect(),
            ..CollectSettings::default()
        };

        let options = settings.into_options();
        assert!(!options.use_bundle);
        assert!(matches!(
            options.templates.get("css"),
            Some(MarkupTemplate::Format(_))
        ));
    }
}
