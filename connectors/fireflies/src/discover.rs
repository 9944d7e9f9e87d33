use anyhow::{Context, Result};
use serde_json::Value;
use shared::singer::{standard_metadata, Catalog, CatalogEntry};

use crate::streams::StreamKind;

pub fn catalog_entry(kind: StreamKind) -> Result<CatalogEntry> {
    let schema: Value = serde_json::from_str(kind.schema())
        .with_context(|| format!("Invalid embedded schema for {}", kind.name()))?;
    let replication_keys: Vec<&str> = kind.bookmark_key().into_iter().collect();

    Ok(CatalogEntry {
        tap_stream_id: kind.name().to_string(),
        stream: kind.name().to_string(),
        metadata: standard_metadata(
            &schema,
            kind.key_properties(),
            &replication_keys,
            kind.replication_method(),
        ),
        schema,
        key_properties: kind.key_properties().iter().map(|k| k.to_string()).collect(),
        replication_key: kind.bookmark_key().map(str::to_string),
        replication_method: Some(kind.replication_method()),
    })
}

pub fn discover() -> Result<Catalog> {
    let streams = StreamKind::ALL
        .into_iter()
        .map(catalog_entry)
        .collect::<Result<Vec<_>>>()?;
    Ok(Catalog { streams })
}
