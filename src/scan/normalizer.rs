//! Converts provider engine tables into the canonical [`Verdict`].
//!
//! Provider endpoints disagree on field names: analysis results carry a
//! `category`, some older payloads only a `result`. Every entry is decoded
//! into [`RawEngineResult`] and its category resolved by a single fallback
//! chain so the precedence lives in one place.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use super::types::{Category, EngineVerdict, Verdict};

/// One engine entry as the provider sends it
#[derive(Debug, Default, Deserialize)]
pub struct RawEngineResult {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub engine_name: Option<String>,
}

impl RawEngineResult {
    /// `category`, else `result`, else clean
    pub fn resolve_category(&self) -> Category {
        [self.category.as_deref(), self.result.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|label| !label.is_empty())
            .map(category_from_label)
            .unwrap_or(Category::Clean)
    }
}

/// Fold a provider label into one of the four buckets
pub fn category_from_label(label: &str) -> Category {
    match label.to_ascii_lowercase().as_str() {
        "malicious" => Category::Malicious,
        "suspicious" => Category::Suspicious,
        "harmless" => Category::Harmless,
        _ => Category::Clean,
    }
}

/// Normalize a JSON object of `engine -> entry`. Anything that is not an
/// object, and entries that fail to decode, are skipped.
pub fn normalize_table(table: &Value) -> Verdict {
    let Some(entries) = table.as_object() else {
        return Verdict::empty();
    };

    let decoded = entries.iter().filter_map(|(engine, raw)| {
        match RawEngineResult::deserialize(raw) {
            Ok(entry) => Some((engine.clone(), entry)),
            Err(e) => {
                log::debug!("Skipping malformed engine entry {}: {}", engine, e);
                None
            }
        }
    });

    normalize(decoded)
}

/// Normalize already-decoded engine entries
pub fn normalize<I>(entries: I) -> Verdict
where
    I: IntoIterator<Item = (String, RawEngineResult)>,
{
    let engines: BTreeMap<String, EngineVerdict> = entries
        .into_iter()
        .map(|(engine, raw)| {
            let category = raw.resolve_category();
            let engine_name = raw.engine_name.unwrap_or_else(|| engine.clone());
            (
                engine,
                EngineVerdict {
                    engine_name,
                    category,
                },
            )
        })
        .collect();

    Verdict::from_engines(engines)
}
