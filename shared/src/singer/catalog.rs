use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMethod {
    FullTable,
    Incremental,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub breadcrumb: Vec<String>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub tap_stream_id: String,
    pub stream: String,
    pub schema: Value,
    #[serde(default)]
    pub key_properties: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_method: Option<ReplicationMethod>,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

impl CatalogEntry {
    fn root_metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata
            .iter()
            .find(|m| m.breadcrumb.is_empty())
            .map(|m| &m.metadata)
    }

    pub fn is_selected(&self) -> bool {
        self.root_metadata()
            .and_then(|m| m.get("selected"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_selected(&mut self, selected: bool) {
        match self.metadata.iter_mut().find(|m| m.breadcrumb.is_empty()) {
            Some(root) => {
                root.metadata.insert("selected".to_string(), json!(selected));
            }
            None => {
                let mut metadata = Map::new();
                metadata.insert("selected".to_string(), json!(selected));
                self.metadata.push(MetadataEntry {
                    breadcrumb: vec![],
                    metadata,
                });
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn get_stream(&self, tap_stream_id: &str) -> Option<&CatalogEntry> {
        self.streams.iter().find(|s| s.tap_stream_id == tap_stream_id)
    }

    pub fn selected_streams(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.streams.iter().filter(|s| s.is_selected())
    }

    pub fn select_all(&mut self) {
        for stream in &mut self.streams {
            stream.set_selected(true);
        }
    }
}

/// Standard Singer metadata: a root entry carrying keys and replication
/// settings, plus one entry per top-level property marking key and
/// replication fields as automatically included.
pub fn standard_metadata(
    schema: &Value,
    key_properties: &[&str],
    valid_replication_keys: &[&str],
    replication_method: ReplicationMethod,
) -> Vec<MetadataEntry> {
    let mut root = Map::new();
    root.insert("table-key-properties".to_string(), json!(key_properties));
    root.insert(
        "forced-replication-method".to_string(),
        json!(replication_method),
    );
    if !valid_replication_keys.is_empty() {
        root.insert(
            "valid-replication-keys".to_string(),
            json!(valid_replication_keys),
        );
    }

    let mut entries = vec![MetadataEntry {
        breadcrumb: vec![],
        metadata: root,
    }];

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for name in properties.keys() {
            let automatic = key_properties.contains(&name.as_str())
                || valid_replication_keys.contains(&name.as_str());
            let mut metadata = Map::new();
            metadata.insert(
                "inclusion".to_string(),
                json!(if automatic { "automatic" } else { "available" }),
            );
            entries.push(MetadataEntry {
                breadcrumb: vec!["properties".to_string(), name.clone()],
                metadata,
            });
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "title": {"type": ["null", "string"]},
                "meeting_timestamp": {"type": ["null", "integer"]}
            }
        })
    }

    #[test]
    fn test_standard_metadata_marks_keys_automatic() {
        let entries = standard_metadata(
            &schema(),
            &["id"],
            &["meeting_timestamp"],
            ReplicationMethod::Incremental,
        );

        assert_eq!(entries.len(), 4);
        assert_eq!(
            entries[0].metadata["forced-replication-method"],
            json!("INCREMENTAL")
        );
        let inclusion = |field: &str| {
            entries
                .iter()
                .find(|e| e.breadcrumb.last().map(String::as_str) == Some(field))
                .map(|e| e.metadata["inclusion"].clone())
        };
        assert_eq!(inclusion("id"), Some(json!("automatic")));
        assert_eq!(inclusion("meeting_timestamp"), Some(json!("automatic")));
        assert_eq!(inclusion("title"), Some(json!("available")));
    }

    #[test]
    fn test_selection_reads_root_metadata() {
        let mut entry = CatalogEntry {
            tap_stream_id: "users".to_string(),
            stream: "users".to_string(),
            schema: schema(),
            key_properties: vec!["id".to_string()],
            replication_key: None,
            replication_method: Some(ReplicationMethod::FullTable),
            metadata: vec![],
        };
        assert!(!entry.is_selected());

        entry.set_selected(true);
        assert!(entry.is_selected());

        let catalog = Catalog {
            streams: vec![entry],
        };
        assert_eq!(catalog.selected_streams().count(), 1);
    }
}
