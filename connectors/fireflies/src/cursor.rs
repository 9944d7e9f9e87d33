use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::client::GraphQLTransport;
use crate::error::FirefliesError;
use crate::streams::Record;

/// The `(fromDate, toDate)` pair plus `limit`/`skip` sent with one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
    pub limit: usize,
    pub skip: usize,
}

impl Window {
    pub fn variables(&self) -> Value {
        json!({
            "fromDate": self.from_date.to_rfc3339_opts(SecondsFormat::Millis, true),
            "toDate": self.to_date.to_rfc3339_opts(SecondsFormat::Millis, true),
            "limit": self.limit,
            "skip": self.skip,
        })
    }
}

#[derive(Debug, Default)]
pub struct CursorOutcome {
    pub records: Vec<Record>,
    /// Highest replication value among the records returned in `records`.
    pub max_replication: Option<i64>,
    pub pages: usize,
}

/// Walks a time-ordered (newest first) resource backwards: each page's
/// oldest timestamp becomes the next page's `toDate`, until the window
/// collapses onto `fromDate`.
pub struct TimeWindowCursor<'a> {
    pub transport: &'a dyn GraphQLTransport,
    pub query: &'a str,
    pub result_field: &'a str,
    pub key_properties: &'a [&'a str],
    pub replication_field: &'a str,
    pub page_size: usize,
}

impl TimeWindowCursor<'_> {
    pub async fn walk(
        &self,
        from_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CursorOutcome, FirefliesError> {
        let mut window = Window {
            from_date,
            to_date: now,
            limit: self.page_size,
            skip: 0,
        };
        let mut visited: HashSet<String> = HashSet::new();
        let mut outcome = CursorOutcome::default();

        loop {
            info!(
                "In the process of paging. Current fromDate: {}, toDate: {}",
                window.from_date, window.to_date
            );

            let body = self.transport.execute(self.query, window.variables()).await?;
            let page = body
                .get("data")
                .filter(|d| !d.is_null())
                .ok_or_else(|| FirefliesError::EmptyResponse(self.result_field.to_string()))?
                .get(self.result_field)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            outcome.pages += 1;

            let page_len = page.len();
            let mut has_new_record = false;
            let mut page_min: Option<i64> = None;

            for value in page {
                let Value::Object(record) = value else {
                    continue;
                };

                let replication = replication_millis(&record, self.replication_field);
                if let Some(ts) = replication {
                    page_min = Some(page_min.map_or(ts, |m| m.min(ts)));
                }

                if !visited.insert(record_identity(&record, self.key_properties)) {
                    continue;
                }
                has_new_record = true;
                if let Some(ts) = replication {
                    outcome.max_replication =
                        Some(outcome.max_replication.map_or(ts, |m| m.max(ts)));
                }
                outcome.records.push(record);
            }

            let next_to_date = page_min.and_then(DateTime::<Utc>::from_timestamp_millis);
            let narrows = next_to_date.is_some_and(|next| next < window.to_date);

            if page_len < self.page_size || !has_new_record || !narrows {
                debug!(
                    "Stopping walk: page_len={}, has_new_record={}, narrows={}",
                    page_len, has_new_record, narrows
                );
                break;
            }
            if let Some(next) = next_to_date {
                window.to_date = next;
            }
        }

        info!(
            "Collected {} record(s) across {} page(s)",
            outcome.records.len(),
            outcome.pages
        );
        Ok(outcome)
    }
}

/// Identity of a record built from its key fields.
pub fn record_identity(record: &Record, key_properties: &[&str]) -> String {
    key_properties
        .iter()
        .map(|k| match record.get(*k) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        })
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Reads a millisecond epoch, accepting integers, floats and numeric strings.
pub fn replication_millis(record: &Record, field: &str) -> Option<i64> {
    match record.get(field)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse::<i64>().ok().or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis())
        }),
        _ => None,
    }
}
