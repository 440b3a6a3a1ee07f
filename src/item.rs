//! Extracted output: structured records and binary file artifacts.
//!
//! Parsing code hands the engine either a position-indexed or a name-indexed
//! mapping of field values; the engine resolves both against the owning
//! rule's field schema and buffers the result as a [`ScrapedRecord`] with
//! full provenance. Binary artifacts travel separately as
//! [`ExtractedFile`]s, keeping their bodies as streams so large downloads
//! never sit in memory twice.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

/// Field values for one item, before resolution against a rule's schema.
///
/// `Positional` entries are resolved index-by-index against the rule's
/// current field list; `Named` entries extend the field list with any names
/// it has not seen yet.
#[derive(Debug, Clone)]
pub enum ItemPayload {
    /// index → value, interpreted against the rule's field order.
    Positional(BTreeMap<usize, Value>),
    /// name → value; unknown names grow the rule's schema.
    Named(Map<String, Value>),
}

impl ItemPayload {
    /// Builds a positional payload from `(index, value)` pairs.
    pub fn positional<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (usize, Value)>,
    {
        ItemPayload::Positional(entries.into_iter().collect())
    }

    /// Builds a named payload from `(name, value)` pairs.
    pub fn named<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        ItemPayload::Named(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<BTreeMap<usize, Value>> for ItemPayload {
    fn from(map: BTreeMap<usize, Value>) -> Self {
        ItemPayload::Positional(map)
    }
}

impl From<Map<String, Value>> for ItemPayload {
    fn from(map: Map<String, Value>) -> Self {
        ItemPayload::Named(map)
    }
}

/// One extracted record, stamped with its provenance.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapedRecord {
    /// Name of the rule that produced the record.
    pub rule: String,
    /// Resolved field values.
    pub fields: Map<String, Value>,
    /// URL of the page the record came from.
    pub url: String,
    /// Referrer of that page, empty when unknown.
    pub referer: String,
    /// When the record was emitted.
    pub scraped_at: DateTime<Utc>,
}

impl ScrapedRecord {
    pub(crate) fn new(
        rule: impl Into<String>,
        fields: Map<String, Value>,
        url: impl Into<String>,
        referer: impl Into<String>,
    ) -> Self {
        ScrapedRecord {
            rule: rule.into(),
            fields,
            url: url.into(),
            referer: referer.into(),
            scraped_at: Utc::now(),
        }
    }
}

/// A binary artifact extracted by parsing code.
///
/// The body is a readable stream owned by the sink that drains it.
pub struct ExtractedFile {
    /// File name chosen by the emitting rule.
    pub name: String,
    /// Name of the rule that produced the file, empty when emitted outside
    /// any resolved rule.
    pub rule: String,
    /// The file contents.
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for ExtractedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractedFile")
            .field("name", &self.name)
            .field("rule", &self.rule)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_constructors_collect_entries() {
        let positional = ItemPayload::positional([(0, json!("a")), (2, json!("c"))]);
        match positional {
            ItemPayload::Positional(map) => {
                assert_eq!(map.len(), 2);
                assert_eq!(map[&2], json!("c"));
            }
            ItemPayload::Named(_) => panic!("expected positional payload"),
        }

        let named = ItemPayload::named([("title", json!("t")), ("href", json!("h"))]);
        match named {
            ItemPayload::Named(map) => assert_eq!(map["title"], json!("t")),
            ItemPayload::Positional(_) => panic!("expected named payload"),
        }
    }

    #[test]
    fn records_serialize_with_provenance() {
        let mut fields = Map::new();
        fields.insert("title".into(), json!("hello"));
        let record = ScrapedRecord::new("news", fields, "https://example.com/a", "");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["rule"], "news");
        assert_eq!(value["fields"]["title"], "hello");
        assert_eq!(value["url"], "https://example.com/a");
    }
}
