use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::client::GraphQLTransport;
use crate::config::{
    MAX_PAGE_SIZE, PAGINATION_COOLDOWN, PAGINATION_REQUESTS_PER_COOLDOWN, RECORD_CEILING,
};
use crate::error::FirefliesError;

#[derive(Debug, Clone, Copy)]
pub struct PaginationSettings {
    pub step_size: usize,
    /// Pagination stops once more than this many records were read.
    pub ceiling: usize,
    pub requests_per_cooldown: u32,
    pub cooldown: Duration,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            step_size: MAX_PAGE_SIZE,
            ceiling: RECORD_CEILING,
            requests_per_cooldown: PAGINATION_REQUESTS_PER_COOLDOWN,
            cooldown: PAGINATION_COOLDOWN,
        }
    }
}

/// Stop condition for a backward scan: the first record in `result_field`
/// whose `cutoff_field` is below `value` ends pagination, and neither it nor
/// anything after it is kept.
#[derive(Debug, Clone, Copy)]
pub struct CutoffSpec<'a> {
    pub result_field: &'a str,
    pub cutoff_field: &'a str,
    pub value: i64,
}

#[derive(Debug, Default)]
pub struct Paginated {
    pub results: BTreeMap<String, Vec<Value>>,
    pub total: usize,
}

impl Paginated {
    pub fn take(&mut self, field: &str) -> Vec<Value> {
        self.results.remove(field).unwrap_or_default()
    }
}

/// Drives `limit`/`skip` windows against one GraphQL query until the source
/// is exhausted, a cutoff is crossed, or the record ceiling trips.
pub struct Paginator<'a> {
    transport: &'a dyn GraphQLTransport,
    settings: PaginationSettings,
}

impl<'a> Paginator<'a> {
    pub fn new(transport: &'a dyn GraphQLTransport, settings: PaginationSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// The first of `result_fields` decides page size and exhaustion; every
    /// field is merged across pages in API order.
    pub async fn paginate(
        &self,
        query: &str,
        result_fields: &[&str],
    ) -> Result<Paginated, FirefliesError> {
        self.run(query, result_fields, None).await
    }

    pub async fn paginate_with_cutoff(
        &self,
        query: &str,
        result_fields: &[&str],
        cutoff: &CutoffSpec<'_>,
    ) -> Result<Paginated, FirefliesError> {
        self.run(query, result_fields, Some(cutoff)).await
    }

    async fn run(
        &self,
        query: &str,
        result_fields: &[&str],
        cutoff: Option<&CutoffSpec<'_>>,
    ) -> Result<Paginated, FirefliesError> {
        let lead = *result_fields
            .first()
            .ok_or_else(|| FirefliesError::MissingField {
                context: "pagination".to_string(),
                field: "<result field>".to_string(),
            })?;

        let mut merged = Paginated::default();
        for field in result_fields {
            merged.results.insert(field.to_string(), Vec::new());
        }
        let mut request_count = 0u32;

        while merged.total <= self.settings.ceiling {
            let variables = json!({
                "limit": self.settings.step_size,
                "skip": merged.total,
            });
            request_count += 1;

            let body = self.transport.execute(query, variables).await?;
            let data = body
                .get("data")
                .filter(|d| !d.is_null())
                .ok_or_else(|| FirefliesError::MissingField {
                    context: lead.to_string(),
                    field: "data".to_string(),
                })?;

            let batch_size = page(data, lead)?.len();
            if batch_size == 0 {
                info!("No more data comes in. Stop the loop now.");
                break;
            }

            let mut keep = batch_size;
            if let Some(cutoff) = cutoff {
                if let Some(index) = cutoff_index(page(data, cutoff.result_field)?, cutoff)? {
                    info!("We determine the cutoff index to be {}", index);
                    keep = index;
                }
            }

            for field in result_fields {
                let records = page(data, field)?;
                if let Some(merged_field) = merged.results.get_mut(*field) {
                    merged_field.extend(records.iter().take(keep).cloned());
                }
            }
            merged.total += keep;
            debug!("Merged page of {} record(s), {} so far", keep, merged.total);

            if keep < self.settings.step_size {
                info!("We have retrieved all the data. Stop the loop now.");
                break;
            }

            if request_count >= self.settings.requests_per_cooldown {
                request_count = 0;
                info!(
                    "Reached {} requests, cooling down for {:?}",
                    self.settings.requests_per_cooldown, self.settings.cooldown
                );
                sleep(self.settings.cooldown).await;
            }
        }

        Ok(merged)
    }
}

fn page<'v>(data: &'v Value, field: &str) -> Result<&'v [Value], FirefliesError> {
    match data.get(field) {
        Some(Value::Array(records)) => Ok(records),
        Some(Value::Null) => Ok(&[]),
        _ => Err(FirefliesError::MissingField {
            context: "data".to_string(),
            field: field.to_string(),
        }),
    }
}

fn cutoff_index(records: &[Value], cutoff: &CutoffSpec<'_>) -> Result<Option<usize>, FirefliesError> {
    for (index, record) in records.iter().enumerate() {
        let value = record
            .get(cutoff.cutoff_field)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .ok_or_else(|| FirefliesError::MissingField {
                context: cutoff.result_field.to_string(),
                field: cutoff.cutoff_field.to_string(),
            })?;
        if value < cutoff.value {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedTransport;
    use std::time::Instant;

    fn settings(step_size: usize, ceiling: usize) -> PaginationSettings {
        PaginationSettings {
            step_size,
            ceiling,
            requests_per_cooldown: 60,
            cooldown: Duration::from_millis(1),
        }
    }

    fn records(start: usize, count: usize) -> Vec<Value> {
        (start..start + count).map(|i| json!({ "id": i })).collect()
    }

    fn ids(values: &[Value]) -> Vec<i64> {
        values.iter().map(|v| v["id"].as_i64().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_merges_pages_until_short_page() {
        let transport = ScriptedTransport::pages(
            "transcripts",
            vec![records(0, 3), records(3, 3), records(6, 1)],
        );
        let paginator = Paginator::new(&transport, settings(3, 5000));

        let mut result = paginator.paginate("q", &["transcripts"]).await.unwrap();

        assert_eq!(result.total, 7);
        assert_eq!(ids(&result.take("transcripts")), vec![0, 1, 2, 3, 4, 5, 6]);
        let skips: Vec<_> = transport.calls().iter().map(|c| c["skip"].clone()).collect();
        assert_eq!(skips, vec![json!(0), json!(3), json!(6)]);
        assert_eq!(transport.calls()[0]["limit"], json!(3));
    }

    #[tokio::test]
    async fn test_stops_on_empty_page() {
        let transport = ScriptedTransport::pages("transcripts", vec![records(0, 2), vec![]]);
        let paginator = Paginator::new(&transport, settings(2, 5000));

        let result = paginator.paginate("q", &["transcripts"]).await.unwrap();

        assert_eq!(result.total, 2);
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_endless_full_pages_trip_the_ceiling() {
        let transport = ScriptedTransport::new(|call, _| {
            Ok(json!({ "data": { "transcripts": records(call * 50, 50) } }))
        });
        let paginator = Paginator::new(&transport, settings(50, 120));

        let result = paginator.paginate("q", &["transcripts"]).await.unwrap();

        assert_eq!(transport.calls().len(), 3);
        assert_eq!(result.total, 150);
    }

    #[tokio::test]
    async fn test_cutoff_truncates_page_and_stops() {
        let page: Vec<Value> = [100, 90, 80, 70]
            .iter()
            .enumerate()
            .map(|(i, ts)| json!({ "id": i, "meeting_timestamp": ts }))
            .collect();
        let transport = ScriptedTransport::pages("transcripts", vec![page.clone(), page]);
        let paginator = Paginator::new(&transport, settings(4, 5000));
        let cutoff = CutoffSpec {
            result_field: "transcripts",
            cutoff_field: "meeting_timestamp",
            value: 75,
        };

        let mut result = paginator
            .paginate_with_cutoff("q", &["transcripts"], &cutoff)
            .await
            .unwrap();

        assert_eq!(result.total, 3);
        let kept: Vec<_> = result
            .take("transcripts")
            .iter()
            .map(|r| r["meeting_timestamp"].as_i64().unwrap())
            .collect();
        assert_eq!(kept, vec![100, 90, 80]);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cutoff_on_first_record_keeps_nothing() {
        let transport = ScriptedTransport::pages(
            "transcripts",
            vec![vec![json!({ "id": 1, "meeting_timestamp": 10 })]],
        );
        let paginator = Paginator::new(&transport, settings(1, 5000));
        let cutoff = CutoffSpec {
            result_field: "transcripts",
            cutoff_field: "meeting_timestamp",
            value: 50,
        };

        let result = paginator
            .paginate_with_cutoff("q", &["transcripts"], &cutoff)
            .await
            .unwrap();

        assert_eq!(result.total, 0);
        assert!(result.results["transcripts"].is_empty());
    }

    #[tokio::test]
    async fn test_every_named_field_is_merged() {
        let transport = ScriptedTransport::new(|call, _| {
            let users = if call == 0 { vec![json!({"id": "u1"})] } else { vec![] };
            Ok(json!({ "data": { "transcripts": records(call * 2, if call == 0 { 2 } else { 1 }), "users": users } }))
        });
        let paginator = Paginator::new(&transport, settings(2, 5000));

        let mut result = paginator
            .paginate("q", &["transcripts", "users"])
            .await
            .unwrap();

        assert_eq!(ids(&result.take("transcripts")), vec![0, 1, 2]);
        assert_eq!(result.take("users"), vec![json!({"id": "u1"})]);
    }

    #[tokio::test]
    async fn test_cools_down_after_request_budget() {
        let transport = ScriptedTransport::pages(
            "transcripts",
            vec![records(0, 1), records(1, 1), records(2, 1)],
        );
        let paginator = Paginator::new(
            &transport,
            PaginationSettings {
                step_size: 1,
                ceiling: 5000,
                requests_per_cooldown: 2,
                cooldown: Duration::from_millis(30),
            },
        );

        let started = Instant::now();
        let result = paginator.paginate("q", &["transcripts"]).await.unwrap();

        assert_eq!(result.total, 3);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_missing_data_is_a_data_integrity_error() {
        let transport = ScriptedTransport::new(|_, _| Ok(json!({ "errors": [] })));
        let paginator = Paginator::new(&transport, settings(50, 5000));

        let err = paginator.paginate("q", &["transcripts"]).await.unwrap_err();

        assert!(matches!(err, FirefliesError::MissingField { ref field, .. } if field == "data"));
    }
}
