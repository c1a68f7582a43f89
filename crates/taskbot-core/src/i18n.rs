//! Translation boundary.
//!
//! A [`Translator`] resolves a message key for a locale. [`Translations`] is
//! the bundled implementation: one flat key → text table per locale plus a
//! default locale used as fallback.
//!
//! The JSON layout accepted by [`Translations::from_json`] mirrors a bundle of
//! locale files:
//!
//! ```json
//! {
//!   "default": "ru",
//!   "en": { "start": "Hello!" },
//!   "ru": { "start": "Привет!" }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

/// Looks up user-facing strings.
pub trait Translator: Send + Sync + 'static {
    /// Returns the text for `key` in `locale`.
    ///
    /// Falls back to the default locale, then to the key itself.
    fn translate(&self, locale: &str, key: &str) -> String;

    fn default_locale(&self) -> &str;

    /// Every locale with a translation table, sorted.
    fn available_locales(&self) -> Vec<String>;

    fn is_available(&self, locale: &str) -> bool {
        self.available_locales().iter().any(|l| l == locale)
    }
}

/// A shared translator handle.
pub type BoxedTranslator = Arc<dyn Translator>;

/// In-memory translation tables.
#[derive(Debug, Clone)]
pub struct Translations {
    default: String,
    tables: BTreeMap<String, HashMap<String, String>>,
}

impl Translations {
    /// Creates an empty set of tables with the given default locale.
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            tables: BTreeMap::new(),
        }
    }

    /// Adds (or extends) the table for `locale`.
    pub fn with_locale<I, K, V>(mut self, locale: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.tables
            .entry(locale.into())
            .or_default()
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Parses a bundle where the `"default"` key names the default locale and
    /// every other key maps a locale to its table.
    ///
    /// Non-string values inside a table are skipped with a warning.
    pub fn from_json(bundle: &Value) -> Result<Self, String> {
        let object = bundle
            .as_object()
            .ok_or_else(|| "translation bundle must be a JSON object".to_string())?;
        let default = object
            .get("default")
            .and_then(Value::as_str)
            .ok_or_else(|| "translation bundle has no string \"default\" key".to_string())?;

        let mut translations = Self::new(default);
        for (locale, table) in object.iter().filter(|(k, _)| k.as_str() != "default") {
            let table = table
                .as_object()
                .ok_or_else(|| format!("locale '{locale}' must map to an object"))?;
            let entries = table.iter().filter_map(|(key, text)| match text.as_str() {
                Some(text) => Some((key.clone(), text.to_string())),
                None => {
                    warn!(locale = %locale, key = %key, "Skipping non-string translation");
                    None
                }
            });
            translations = translations.with_locale(locale.clone(), entries);
        }

        if !translations.tables.contains_key(&translations.default) {
            return Err(format!(
                "default locale '{}' has no translation table",
                translations.default
            ));
        }
        Ok(translations)
    }
}

impl Translator for Translations {
    fn translate(&self, locale: &str, key: &str) -> String {
        self.tables
            .get(locale)
            .and_then(|t| t.get(key))
            .or_else(|| self.tables.get(&self.default).and_then(|t| t.get(key)))
            .cloned()
            .unwrap_or_else(|| {
                warn!(locale, key, "Missing translation");
                key.to_string()
            })
    }

    fn default_locale(&self) -> &str {
        &self.default
    }

    fn available_locales(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}
