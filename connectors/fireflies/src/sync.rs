use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use shared::singer::{Catalog, CatalogEntry, RecordEmitter, StatePersister};
use shared::{BookmarkValue, State};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::client::GraphQLTransport;
use crate::config::{TapConfig, MAX_PAGE_SIZE};
use crate::cursor::{record_identity, TimeWindowCursor};
use crate::error::FirefliesError;
use crate::pagination::{CutoffSpec, PaginationSettings, Paginator};
use crate::streams::{BookmarkFormat, FetchStrategy, Record, StreamKind};

/// Epoch values below this are taken to be seconds rather than milliseconds.
const SECONDS_EPOCH_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncPhase {
    Init,
    Fetching,
    Emitting,
    Finalizing,
    Done,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Init => "INIT",
            SyncPhase::Fetching => "FETCHING",
            SyncPhase::Emitting => "FILTERING/EMITTING",
            SyncPhase::Finalizing => "FINALIZING",
            SyncPhase::Done => "DONE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamStatus {
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    pub stream: String,
    pub fetched: usize,
    pub emitted: usize,
    pub status: StreamStatus,
}

#[derive(Debug, Default)]
pub struct SyncSummary {
    pub streams: Vec<StreamSummary>,
}

impl SyncSummary {
    pub fn failed(&self) -> impl Iterator<Item = &StreamSummary> {
        self.streams
            .iter()
            .filter(|s| matches!(s.status, StreamStatus::Failed(_)))
    }

    /// Turns any per-stream failure into an error for the whole run.
    pub fn into_result(self) -> Result<Self> {
        let failures: Vec<String> = self
            .failed()
            .map(|s| match &s.status {
                StreamStatus::Failed(reason) => format!("{}: {}", s.stream, reason),
                StreamStatus::Completed => s.stream.clone(),
            })
            .collect();
        if failures.is_empty() {
            Ok(self)
        } else {
            Err(anyhow!(
                "{} stream(s) failed: {}",
                failures.len(),
                failures.join("; ")
            ))
        }
    }
}

struct StreamRun {
    fetched: usize,
    emitted: usize,
}

pub struct SyncManager<'a> {
    transport: &'a dyn GraphQLTransport,
    config: &'a TapConfig,
    pagination: PaginationSettings,
}

impl<'a> SyncManager<'a> {
    pub fn new(transport: &'a dyn GraphQLTransport, config: &'a TapConfig) -> Self {
        Self {
            transport,
            config,
            pagination: PaginationSettings::default(),
        }
    }

    pub fn with_pagination(mut self, pagination: PaginationSettings) -> Self {
        self.pagination = pagination;
        self
    }

    /// Syncs every selected stream in catalog order. A failing stream is
    /// logged and recorded in the summary; its bookmark is left untouched
    /// and the remaining streams still run. State is persisted at start,
    /// after each stream and at the end.
    pub async fn sync<S>(&self, catalog: &Catalog, state: &mut State, sink: &mut S) -> Result<SyncSummary>
    where
        S: RecordEmitter + StatePersister,
    {
        let mut summary = SyncSummary::default();
        sink.write_state(state).context("Failed to persist state")?;

        for entry in catalog.selected_streams() {
            let Some(kind) = StreamKind::from_name(&entry.tap_stream_id) else {
                warn!("Skipping unknown stream in catalog: {}", entry.tap_stream_id);
                continue;
            };

            info!("Starting sync for stream: {}", kind.name());
            state.set_currently_syncing(Some(kind.name()));
            sink.write_state(state).context("Failed to persist state")?;

            let result = self.sync_stream(kind, entry, state, sink).await;
            let stream_summary = match result {
                Ok(run) => StreamSummary {
                    stream: kind.name().to_string(),
                    fetched: run.fetched,
                    emitted: run.emitted,
                    status: StreamStatus::Completed,
                },
                Err(e) => {
                    error!("Sync failed for stream {}: {:#}", kind.name(), e);
                    StreamSummary {
                        stream: kind.name().to_string(),
                        fetched: 0,
                        emitted: 0,
                        status: StreamStatus::Failed(format!("{:#}", e)),
                    }
                }
            };
            summary.streams.push(stream_summary);

            sink.write_state(state).context("Failed to persist state")?;
        }

        state.set_currently_syncing(None);
        sink.write_state(state).context("Failed to persist state")?;

        Ok(summary)
    }

    async fn sync_stream<S>(
        &self,
        kind: StreamKind,
        entry: &CatalogEntry,
        state: &mut State,
        sink: &mut S,
    ) -> Result<StreamRun>
    where
        S: RecordEmitter + StatePersister,
    {
        let name = kind.name();
        let phase = |p: SyncPhase| debug!(stream = name, phase = %p, "Stream phase");

        phase(SyncPhase::Init);
        sink.write_schema(entry)?;

        let start_millis = self.config.start_datetime()?.timestamp_millis();
        let bookmark_millis = match kind.bookmark_key() {
            Some(key) => match state.get_bookmark(name, key) {
                Some(value) => bookmark_to_millis(name, value)?,
                None => start_millis,
            },
            None => start_millis,
        };
        let cutoff_millis = bookmark_millis.min(start_millis);
        info!(
            "Stream: {}, initial bookmark: {}, cutoff: {}",
            name, bookmark_millis, cutoff_millis
        );

        phase(SyncPhase::Fetching);
        let records = self
            .fetch(kind, bookmark_millis, cutoff_millis)
            .await
            .with_context(|| format!("Failed to fetch {}", name))?;
        let fetched = records.len();
        info!("We collect {} records from Fireflies for {}", fetched, name);

        phase(SyncPhase::Emitting);
        let mut emitted = 0usize;
        let mut max_included: Option<i64> = None;
        let mut emitted_ids: HashSet<String> = HashSet::new();
        let output_keys: Vec<&str> = entry.key_properties.iter().map(String::as_str).collect();

        for record in records {
            if !kind.include_record(&record, cutoff_millis) {
                continue;
            }
            if let Some(ts) = kind.replication_value(&record) {
                max_included = Some(max_included.map_or(ts, |m| m.max(ts)));
            }

            for out in kind.reshape(record)? {
                // Attendees without an email share one identity per meeting;
                // they are emitted rather than collapsed.
                if !has_full_identity(&out, &output_keys) {
                    warn!(
                        "Emitting {} record with an empty key field, not deduplicated",
                        name
                    );
                } else if !emitted_ids.insert(record_identity(&out, &output_keys)) {
                    warn!("Skipping duplicate {} record", name);
                    continue;
                }
                sink.write_record(name, &out, Utc::now())
                    .with_context(|| format!("Failed to emit {} record", name))?;
                emitted += 1;

                if emitted % 1000 == 0 {
                    info!("Still syncing: {}, records written so far: {}", name, emitted);
                }
            }
        }

        phase(SyncPhase::Finalizing);
        if let Some(key) = kind.bookmark_key() {
            let new_millis = max_included.map_or(bookmark_millis, |m| m.max(bookmark_millis));
            let value = match kind.bookmark_format() {
                BookmarkFormat::EpochMillis => BookmarkValue::Epoch(new_millis),
                BookmarkFormat::Rfc3339 => BookmarkValue::from_datetime(
                    DateTime::<Utc>::from_timestamp_millis(new_millis)
                        .ok_or_else(|| anyhow!("Bookmark {} out of range", new_millis))?,
                ),
            };
            info!("Stream: {}, writing final bookmark {:?}", name, value);
            state.set_bookmark(name, key, value);
        }

        info!("FINISHED Syncing: {}, total_records: {}", name, emitted);
        phase(SyncPhase::Done);
        Ok(StreamRun { fetched, emitted })
    }

    async fn fetch(
        &self,
        kind: StreamKind,
        bookmark_millis: i64,
        cutoff_millis: i64,
    ) -> Result<Vec<Record>, FirefliesError> {
        let field = kind.result_field();

        let values = match kind.fetch_strategy() {
            FetchStrategy::Single => {
                let body = self.transport.execute(kind.query(), json!({})).await?;
                let data = body
                    .get("data")
                    .filter(|d| d.as_object().is_some_and(|m| !m.is_empty()))
                    .ok_or_else(|| {
                        error!("response is empty for {} stream", kind.name());
                        FirefliesError::EmptyResponse(kind.name().to_string())
                    })?;
                data.get(field)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
            }
            FetchStrategy::TimeWindow => {
                let from_date = DateTime::<Utc>::from_timestamp_millis(bookmark_millis)
                    .ok_or_else(|| FirefliesError::BadResponse(format!(
                        "bookmark {} is out of range",
                        bookmark_millis
                    )))?;
                let cursor = TimeWindowCursor {
                    transport: self.transport,
                    query: kind.query(),
                    result_field: field,
                    key_properties: kind.key_properties(),
                    replication_field: kind.bookmark_key().unwrap_or("date"),
                    page_size: MAX_PAGE_SIZE,
                };
                let outcome = cursor.walk(from_date, Utc::now()).await?;
                debug!(
                    "Cursor high-water mark for {}: {:?}",
                    kind.name(),
                    outcome.max_replication
                );
                return Ok(outcome.records);
            }
            FetchStrategy::SkipWithCutoff { cutoff_field } => {
                let paginator = Paginator::new(self.transport, self.pagination);
                let cutoff = CutoffSpec {
                    result_field: field,
                    cutoff_field,
                    value: cutoff_millis,
                };
                paginator
                    .paginate_with_cutoff(kind.query(), &[field], &cutoff)
                    .await?
                    .take(field)
            }
        };

        Ok(values
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(record) => Some(record),
                _ => None,
            })
            .collect())
    }
}

fn has_full_identity(record: &Record, key_properties: &[&str]) -> bool {
    key_properties
        .iter()
        .all(|k| record.get(*k).is_some_and(|v| !v.is_null()))
}

/// Reads a stored bookmark as milliseconds. Numeric bookmarks small enough
/// to be seconds are converted, with a warning, since older state files
/// may hold second-resolution values.
fn bookmark_to_millis(stream: &str, value: &BookmarkValue) -> Result<i64> {
    let epoch = match value {
        BookmarkValue::Epoch(n) => *n,
        BookmarkValue::Timestamp(s) => match s.parse::<i64>() {
            Ok(n) => n,
            Err(_) => return Ok(value.parse_timestamp()?.timestamp_millis()),
        },
    };

    if epoch.unsigned_abs() < SECONDS_EPOCH_THRESHOLD as u64 {
        let millis = epoch
            .checked_mul(1000)
            .ok_or_else(|| anyhow!("Bookmark {} for stream {} is out of range", epoch, stream))?;
        warn!(
            "Bookmark {} for stream {} looks like epoch seconds; treating it as {} ms",
            epoch, stream, millis
        );
        Ok(millis)
    } else {
        Ok(epoch)
    }
}
