//! Signature identifier normalization and event-ID resolution.
//!
//! Vendor signature identifiers appear in several textual forms (raw,
//! hyphenated, pipe-composite, `43-`-prefixed). The reference table maps raw
//! signature lists to platform event IDs; this module builds a
//! variant-to-event-ID index from it and resolves identifiers and free text
//! against that index.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{Alarm, EventDetail, EventIdEntry, Rule};

static EMBEDDED_SIGNATURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"43-\d+").expect("embedded signature pattern"));

static TOKEN_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[|,\s]+").expect("token split pattern"));

/// Expands one raw signature into the set of textual variants considered
/// equivalent for indexing and lookup. Empty strings are never emitted.
pub fn signature_variants(raw: &str) -> BTreeSet<String> {
    let mut variants = BTreeSet::new();
    let sig = raw.trim();
    if sig.is_empty() {
        return variants;
    }
    variants.insert(sig.to_string());

    if let Some((_, suffix)) = sig.split_once('-') {
        if !suffix.is_empty() {
            variants.insert(suffix.to_string());
        }
    }

    if let Some(stripped) = sig.strip_prefix("43-") {
        if !stripped.is_empty() {
            variants.insert(stripped.to_string());
        }
    } else {
        variants.insert(format!("43-{sig}"));
    }

    variants
}

/// One record of the reference data file. `Event ID` may arrive as a JSON
/// string or number; `Signature ID` is a comma-separated list of raw
/// signatures.
#[derive(Debug, Deserialize)]
struct MappingRow {
    #[serde(rename = "Event ID", default)]
    event_id: Option<serde_json::Value>,
    #[serde(rename = "Signature ID", default)]
    signature_id: Option<serde_json::Value>,
    #[serde(rename = "Description", default)]
    description: Option<String>,
    #[serde(rename = "Audit Policy", default)]
    audit_policy: Option<String>,
}

fn value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Immutable signature-variant index plus event metadata table, built once
/// from the reference data file and shared by read-only reference.
#[derive(Debug, Default)]
pub struct SignatureIndex {
    by_variant: HashMap<String, BTreeSet<String>>,
    metadata: HashMap<String, EventIdEntry>,
}

impl SignatureIndex {
    pub fn empty() -> Self {
        SignatureIndex::default()
    }

    /// Loads the reference table from a JSON file. A missing file degrades to
    /// an empty index: the resolver then returns no matches but never errors.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "reference data file absent, using empty index");
            return Ok(SignatureIndex::empty());
        }
        let content = std::fs::read_to_string(path)?;
        let index = Self::from_json(&content)?;
        debug!(
            variants = index.by_variant.len(),
            events = index.metadata.len(),
            "signature index loaded"
        );
        Ok(index)
    }

    /// Builds the index from reference table JSON. Rows with a missing or
    /// empty event ID or signature value are skipped.
    pub fn from_json(json: &str) -> Result<Self> {
        let rows: Vec<MappingRow> = serde_json::from_str(json)?;
        let mut index = SignatureIndex::empty();

        for row in &rows {
            let event_id = match row.event_id.as_ref().and_then(value_to_string) {
                Some(id) if !id.trim().is_empty() => id.trim().to_string(),
                _ => continue,
            };

            index
                .metadata
                .entry(event_id.clone())
                .or_insert_with(|| EventIdEntry {
                    event_id: event_id.clone(),
                    description: row.description.clone(),
                    audit_policy: row.audit_policy.clone(),
                });

            let signatures = match row.signature_id.as_ref().and_then(value_to_string) {
                Some(s) if !s.trim().is_empty() => s,
                _ => continue,
            };

            for raw in signatures.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                for variant in signature_variants(raw) {
                    index
                        .by_variant
                        .entry(variant)
                        .or_default()
                        .insert(event_id.clone());
                }
            }
        }

        Ok(index)
    }

    pub fn is_empty(&self) -> bool {
        self.by_variant.is_empty()
    }

    pub fn variant_count(&self) -> usize {
        self.by_variant.len()
    }

    pub fn event_count(&self) -> usize {
        self.metadata.len()
    }

    /// Resolves one identifier to event IDs using the fixed fallback chain:
    /// exact lookup, then the segment after the first `|`, then the segment
    /// after the first `-`, then the identifier prefixed with `43-`. The
    /// first non-empty step wins; the result is sorted and deduplicated.
    pub fn resolve(&self, identifier: &str) -> Vec<String> {
        let id = identifier.trim();
        if id.is_empty() {
            return Vec::new();
        }

        let mut hits = self.by_variant.get(id);

        if hits.is_none() {
            if let Some((_, piped)) = id.split_once('|') {
                hits = self.by_variant.get(piped);
            }
        }

        if hits.is_none() {
            if let Some((_, dashed)) = id.split_once('-') {
                hits = self.by_variant.get(dashed);
            }
        }

        if hits.is_none() {
            hits = self.by_variant.get(&format!("43-{id}"));
        }

        match hits {
            Some(ids) => ids.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Scans free text for embedded `43-<digits>` signatures and resolves
    /// each distinct match. Returns the sorted union.
    pub fn extract_from_text(&self, text: &str) -> Vec<String> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for m in EMBEDDED_SIGNATURE.find_iter(text) {
            seen.insert(m.as_str());
        }

        let mut event_ids = BTreeSet::new();
        for signature in seen {
            event_ids.extend(self.resolve(signature));
        }
        event_ids.into_iter().collect()
    }

    /// Resolves a mixed-format collection: each value is scanned for embedded
    /// signatures and also split on runs of `|`, `,` or whitespace, with each
    /// token resolved independently. One field may therefore carry
    /// comma-joined composites, pipe-joined composites and bare IDs
    /// interchangeably.
    pub fn collect_from_values<'a, I>(&self, values: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let mut event_ids = BTreeSet::new();

        for value in values.into_iter().flatten() {
            let text = value.trim();
            if text.is_empty() {
                continue;
            }

            event_ids.extend(self.extract_from_text(text));

            for token in TOKEN_SPLIT.split(text) {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }
                event_ids.extend(self.resolve(token));
            }
        }

        event_ids
    }

    /// Looks up metadata for each distinct, trimmed, non-empty event ID in
    /// sorted order. Unknown IDs yield entries with `None` fields; lookups
    /// never fail.
    pub fn describe<I, S>(&self, event_ids: I) -> Vec<EventDetail>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let distinct: BTreeSet<String> = event_ids
            .into_iter()
            .map(|id| id.as_ref().trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        distinct
            .into_iter()
            .map(|id| {
                let entry = self.metadata.get(&id);
                EventDetail {
                    description: entry.and_then(|e| e.description.clone()),
                    audit_policy: entry.and_then(|e| e.audit_policy.clone()),
                    id,
                }
            })
            .collect()
    }

    /// All event IDs resolvable from a rule: its signature ID, composite rule
    /// ID and description, unioned with signatures embedded in the raw
    /// payload.
    pub fn rule_event_ids(&self, rule: &Rule) -> Vec<String> {
        let mut event_ids = self.collect_from_values([
            rule.sig_id.as_deref(),
            Some(rule.rule_id.as_str()),
            Some(rule.description.as_str()),
        ]);
        event_ids.extend(self.extract_from_text(&rule.raw_payload));
        event_ids.into_iter().collect()
    }

    /// All event IDs resolvable from an alarm. `linked_rules` extends the
    /// result with the IDs of explicitly linked rules when the caller
    /// requests it; pass an empty slice otherwise.
    pub fn alarm_event_ids(&self, alarm: &Alarm, linked_rules: &[Rule]) -> Vec<String> {
        let mut event_ids = self.collect_from_values([
            alarm.match_value.as_deref(),
            alarm.match_field.as_deref(),
            alarm.note.as_deref(),
        ]);
        event_ids.extend(self.extract_from_text(&alarm.raw_payload));

        for rule in linked_rules {
            event_ids.extend(self.rule_event_ids(rule));
        }

        event_ids.into_iter().collect()
    }
}

/// Process-wide handle to the current index. Readers clone the `Arc` and need
/// no locking; a refresh builds a new index and swaps the reference.
#[derive(Debug)]
pub struct IndexHandle {
    current: RwLock<Arc<SignatureIndex>>,
}

impl IndexHandle {
    pub fn new(index: SignatureIndex) -> Self {
        IndexHandle {
            current: RwLock::new(Arc::new(index)),
        }
    }

    pub fn current(&self) -> Arc<SignatureIndex> {
        self.current.read().clone()
    }

    /// Replaces the shared index with a freshly built one. Existing readers
    /// keep the index they already hold.
    pub fn swap(&self, index: SignatureIndex) {
        *self.current.write() = Arc::new(index);
    }

    /// Rebuilds the index from the reference file and swaps it in. Safe to
    /// retry; a missing file swaps in an empty index.
    pub fn reload(&self, path: &Path) -> Result<()> {
        let index = SignatureIndex::load(path)?;
        self.swap(index);
        Ok(())
    }
}
