pub mod catalog;
pub mod transform;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Write;
use thiserror::Error;

use crate::state::State;
pub use catalog::{standard_metadata, Catalog, CatalogEntry, MetadataEntry, ReplicationMethod};
pub use transform::{transform, TransformError};

pub type Record = Map<String, Value>;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("Record for stream `{stream}` failed schema validation: {source}")]
    Transform {
        stream: String,
        #[source]
        source: TransformError,
    },
    #[error("No schema was written for stream `{0}`")]
    UnknownStream(String),
    #[error("IO error writing message: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize message: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message<'a> {
    Schema {
        stream: &'a str,
        schema: &'a Value,
        key_properties: &'a [String],
        #[serde(skip_serializing_if = "Vec::is_empty")]
        bookmark_properties: Vec<&'a str>,
    },
    Record {
        stream: &'a str,
        record: &'a Record,
        time_extracted: String,
    },
    State {
        value: &'a State,
    },
}

/// Accepts validated records. Failures are data or schema bugs and must not
/// be retried by callers.
pub trait RecordEmitter {
    fn write_schema(&mut self, entry: &CatalogEntry) -> Result<(), EmitError>;

    fn write_record(
        &mut self,
        stream: &str,
        record: &Record,
        time_extracted: DateTime<Utc>,
    ) -> Result<(), EmitError>;
}

pub trait StatePersister {
    fn write_state(&mut self, state: &State) -> Result<(), EmitError>;
}

/// Writes Singer messages as JSON lines, transforming each record against
/// the schema previously announced for its stream.
pub struct SingerWriter<W: Write> {
    out: W,
    schemas: HashMap<String, Value>,
    records_written: u64,
}

impl<W: Write> SingerWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            schemas: HashMap::new(),
            records_written: 0,
        }
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_message(&mut self, message: &Message<'_>) -> Result<(), EmitError> {
        serde_json::to_writer(&mut self.out, message)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> RecordEmitter for SingerWriter<W> {
    fn write_schema(&mut self, entry: &CatalogEntry) -> Result<(), EmitError> {
        self.write_message(&Message::Schema {
            stream: &entry.tap_stream_id,
            schema: &entry.schema,
            key_properties: &entry.key_properties,
            bookmark_properties: entry.replication_key.iter().map(String::as_str).collect(),
        })?;
        self.schemas
            .insert(entry.tap_stream_id.clone(), entry.schema.clone());
        Ok(())
    }

    fn write_record(
        &mut self,
        stream: &str,
        record: &Record,
        time_extracted: DateTime<Utc>,
    ) -> Result<(), EmitError> {
        let schema = self
            .schemas
            .get(stream)
            .ok_or_else(|| EmitError::UnknownStream(stream.to_string()))?;
        let transformed = transform(record, schema).map_err(|source| EmitError::Transform {
            stream: stream.to_string(),
            source,
        })?;

        self.write_message(&Message::Record {
            stream,
            record: &transformed,
            time_extracted: time_extracted.to_rfc3339_opts(SecondsFormat::Micros, true),
        })?;
        self.records_written += 1;
        Ok(())
    }
}

impl<W: Write> StatePersister for SingerWriter<W> {
    fn write_state(&mut self, state: &State) -> Result<(), EmitError> {
        self.write_message(&Message::State { value: state })
    }
}
