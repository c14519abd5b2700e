//! The per-run metadata tree.
//!
//! `RunMetadata` is what ends up in `<prefix>meta.json`:
//!
//! ```text
//! {"metadata": {"start": {...},
//!               "stop": {...},
//!               "descriptors": {stream_name: {descriptor_uid: {...}, ...}, ...}}}
//! ```
//!
//! Everything stored here has already been sanitized, so the tree is always
//! representable as JSON. Descriptor maps are filled lazily: the stream entry
//! is created on first insert for that stream, the uid entry on first insert
//! for that uid.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

/// A sanitized document.
pub type JsonDocument = Map<String, Value>;

/// Descriptors grouped by stream name, then by descriptor uid.
pub type DescriptorIndex = IndexMap<String, IndexMap<String, JsonDocument>>;

/// Root of the metadata file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunMetadata {
    /// The single top-level member.
    pub metadata: MetadataSection,
}

/// The `metadata` member of the metadata file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataSection {
    /// The run's start document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<JsonDocument>,
    /// The run's stop document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<JsonDocument>,
    /// Every descriptor seen, by stream then uid.
    pub descriptors: DescriptorIndex,
}

impl RunMetadata {
    /// Empty tree, as before any document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored start document.
    pub fn start(&self) -> Option<&JsonDocument> {
        self.metadata.start.as_ref()
    }

    /// Stored stop document.
    pub fn stop(&self) -> Option<&JsonDocument> {
        self.metadata.stop.as_ref()
    }

    /// File `doc` under `stream` / `uid`, replacing (and returning) any
    /// descriptor previously filed there.
    pub fn insert_descriptor(
        &mut self,
        stream: String,
        uid: String,
        doc: JsonDocument,
    ) -> Option<JsonDocument> {
        self.metadata
            .descriptors
            .entry(stream)
            .or_default()
            .insert(uid, doc)
    }

    /// Descriptor `uid` of `stream`.
    pub fn descriptor(&self, stream: &str, uid: &str) -> Option<&JsonDocument> {
        self.metadata.descriptors.get(stream)?.get(uid)
    }

    /// Stream names in first-seen order.
    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.metadata.descriptors.keys().map(String::as_str)
    }

    /// Total number of descriptors across all streams.
    pub fn descriptor_count(&self) -> usize {
        self.metadata.descriptors.values().map(IndexMap::len).sum()
    }

    /// The tree as a JSON value.
    pub fn to_value(&self) -> Value {
        let mut section = Map::new();
        if let Some(start) = &self.metadata.start {
            section.insert("start".into(), Value::Object(start.clone()));
        }
        if let Some(stop) = &self.metadata.stop {
            section.insert("stop".into(), Value::Object(stop.clone()));
        }
        let descriptors = self
            .metadata
            .descriptors
            .iter()
            .map(|(stream, by_uid)| {
                let by_uid = by_uid
                    .iter()
                    .map(|(uid, doc)| (uid.clone(), Value::Object(doc.clone())))
                    .collect();
                (stream.clone(), Value::Object(by_uid))
            })
            .collect();
        section.insert("descriptors".into(), Value::Object(descriptors));

        let mut root = Map::new();
        root.insert("metadata".into(), Value::Object(section));
        Value::Object(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> JsonDocument {
        match value {
            Value::Object(map) => map,
            _ => panic!("test documents are objects"),
        }
    }

    #[test]
    fn test_descriptor_insert_is_lazy_and_overwrites() {
        let mut tree = RunMetadata::new();
        assert!(tree
            .insert_descriptor("primary".into(), "d1".into(), doc(json!({"v": 1})))
            .is_none());
        let previous =
            tree.insert_descriptor("primary".into(), "d1".into(), doc(json!({"v": 2})));

        assert_eq!(previous, Some(doc(json!({"v": 1}))));
        assert_eq!(tree.descriptor_count(), 1);
        assert_eq!(tree.descriptor("primary", "d1"), Some(&doc(json!({"v": 2}))));
    }

    #[test]
    fn test_streams_group_their_descriptors() {
        let mut tree = RunMetadata::new();
        tree.insert_descriptor("primary".into(), "d1".into(), JsonDocument::new());
        tree.insert_descriptor("baseline".into(), "d2".into(), JsonDocument::new());
        tree.insert_descriptor("primary".into(), "d3".into(), JsonDocument::new());

        assert_eq!(tree.stream_names().collect::<Vec<_>>(), vec!["primary", "baseline"]);
        assert_eq!(tree.metadata.descriptors["primary"].len(), 2);
        assert_eq!(tree.metadata.descriptors["baseline"].len(), 1);
    }

    #[test]
    fn test_to_value_matches_serde_layout() {
        let mut tree = RunMetadata::new();
        tree.metadata.start = Some(doc(json!({"uid": "u1"})));
        tree.insert_descriptor("primary".into(), "d1".into(), doc(json!({"uid": "d1"})));

        let expected = json!({"metadata": {
            "start": {"uid": "u1"},
            "descriptors": {"primary": {"d1": {"uid": "d1"}}},
        }});
        assert_eq!(tree.to_value(), expected);
        assert_eq!(serde_json::to_value(&tree).unwrap(), expected);
    }
}
