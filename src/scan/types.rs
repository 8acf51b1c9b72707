use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which namespace a scan key lives in
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// SHA-256 of a file's content
    #[serde(rename = "sha256")]
    Hash,
    Url,
}

impl KeyKind {
    /// Column value used by the cache table
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Hash => "sha256",
            KeyKind::Url => "url",
        }
    }
}

/// Identifies a resolvable subject. `(value, kind)` is the composite key.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct ScanKey {
    pub value: String,
    pub kind: KeyKind,
}

impl ScanKey {
    pub fn hash(sha256: &str) -> Self {
        Self {
            value: sha256.to_lowercase(),
            kind: KeyKind::Hash,
        }
    }

    pub fn url(url: &str) -> Self {
        Self {
            value: url.trim().to_string(),
            kind: KeyKind::Url,
        }
    }
}

impl fmt::Display for ScanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.value)
    }
}

/// Canonical per-engine category
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Malicious,
    Suspicious,
    Harmless,
    Clean,
    /// Stored records carrying a label this build does not know
    #[serde(other)]
    Unknown,
}

impl Category {
    pub fn is_flagged(&self) -> bool {
        matches!(self, Category::Malicious | Category::Suspicious)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Category::Malicious => "malicious",
            Category::Suspicious => "suspicious",
            Category::Harmless => "harmless",
            Category::Clean => "clean",
            Category::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// One engine's opinion about a subject
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct EngineVerdict {
    pub engine_name: String,
    pub category: Category,
}

/// Tally of engine categories in the four canonical buckets
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Counts {
    pub malicious: u32,
    pub suspicious: u32,
    pub harmless: u32,
    pub clean: u32,
}

impl Counts {
    pub fn record(&mut self, category: Category) {
        match category {
            Category::Malicious => self.malicious += 1,
            Category::Suspicious => self.suspicious += 1,
            Category::Harmless => self.harmless += 1,
            Category::Clean => self.clean += 1,
            Category::Unknown => {}
        }
    }

    pub fn total(&self) -> u32 {
        self.malicious + self.suspicious + self.harmless + self.clean
    }
}

/// Canonical verdict for one scanned subject.
///
/// An empty engine map means "no data available", which is not the same
/// thing as "clean" even though both present zero malicious detections.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Verdict {
    pub counts: Counts,
    #[serde(default)]
    pub engines: BTreeMap<String, EngineVerdict>,
}

impl Verdict {
    /// The "no data" verdict
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a verdict whose counts are tallied from the engine map
    pub fn from_engines(engines: BTreeMap<String, EngineVerdict>) -> Self {
        let mut counts = Counts::default();
        for engine in engines.values() {
            counts.record(engine.category);
        }
        Self { counts, engines }
    }

    /// Synthetic verdict returned for deny-listed hashes
    pub fn local_deny() -> Self {
        let mut engines = BTreeMap::new();
        engines.insert(
            LOCAL_DENY_ENGINE.to_string(),
            EngineVerdict {
                engine_name: "Local Signature DB".to_string(),
                category: Category::Malicious,
            },
        );
        Self::from_engines(engines)
    }

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    /// False for the "no data" verdict
    pub fn has_data(&self) -> bool {
        !self.engines.is_empty()
    }

    pub fn is_flagged(&self) -> bool {
        self.counts.malicious > 0 || self.counts.suspicious > 0
    }

    /// Engines reporting malicious or suspicious, sorted by name
    pub fn flagged_engines(&self) -> Vec<(&str, Category)> {
        self.engines
            .iter()
            .filter(|(_, e)| e.category.is_flagged())
            .map(|(name, e)| (name.as_str(), e.category))
            .collect()
    }
}

/// Engine key used for local deny-list hits
pub const LOCAL_DENY_ENGINE: &str = "LocalDB";

/// Which tier produced a verdict
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    LocalDeny,
    Cache,
    Remote,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Origin::LocalDeny => "local-deny",
            Origin::Cache => "cache",
            Origin::Remote => "remote",
        };
        f.write_str(label)
    }
}

/// Outcome of resolving one key
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Resolution {
    pub key: ScanKey,
    pub verdict: Verdict,
    pub origin: Origin,
    /// Set when the remote tier could not produce real data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

/// Content digests of a file
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Digests {
    pub md5: String,
    pub sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_match_concrete_engines() {
        let mut engines = BTreeMap::new();
        for (name, category) in [
            ("A", Category::Malicious),
            ("B", Category::Clean),
            ("C", Category::Unknown),
        ] {
            engines.insert(
                name.to_string(),
                EngineVerdict {
                    engine_name: name.to_string(),
                    category,
                },
            );
        }
        let verdict = Verdict::from_engines(engines);
        assert_eq!(verdict.counts.total(), 2);
        assert_eq!(verdict.counts.malicious, 1);
        assert_eq!(verdict.engine_count(), 3);
    }

    #[test]
    fn test_empty_is_not_clean() {
        let empty = Verdict::empty();
        assert!(!empty.has_data());
        assert!(!empty.is_flagged());

        let mut engines = BTreeMap::new();
        engines.insert(
            "A".to_string(),
            EngineVerdict {
                engine_name: "A".to_string(),
                category: Category::Clean,
            },
        );
        let clean = Verdict::from_engines(engines);
        assert!(clean.has_data());
        assert_eq!(clean.counts.malicious, empty.counts.malicious);
    }

    #[test]
    fn test_unknown_label_deserializes() {
        let v: EngineVerdict =
            serde_json::from_str(r#"{"engine_name":"X","category":"type-unsupported"}"#).unwrap();
        assert_eq!(v.category, Category::Unknown);
    }

    #[test]
    fn test_scan_key_kinds_are_distinct() {
        let value = "abc";
        assert_ne!(ScanKey::hash(value), ScanKey::url(value));
        assert_eq!(KeyKind::Hash.as_str(), "sha256");
    }
}
