//! Template rendering helpers for tera-based sites: declarative CSS/JS
//! asset collection, fragment caching, and URL/HTML link building.

pub mod collect;
pub mod config;
pub mod extension;
pub mod fragment;
pub mod links;
pub mod urls;

pub use collect::{AssetCollector, CollectError, CollectionOptions, MarkupTemplate};
pub use config::{load_settings, HelperSettings};
pub use extension::CollectionExtension;
pub use fragment::{CacheStore, CacheTimeout, FragmentCache, JsonFileStore, MemoryStore};
pub use links::{create_html_link, create_html_mailto, EmailObfuscation, MailtoOptions};
pub use urls::{canonical_query, create_aws_request_url, create_url, same_urls};
