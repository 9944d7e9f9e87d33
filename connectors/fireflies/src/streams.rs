use serde_json::Value;
use shared::singer::ReplicationMethod;

use crate::cursor::replication_millis;
use crate::error::FirefliesError;
use crate::models::{MeetingAttendeesRow, MeetingInfoRecord, MeetingInfoRow};

pub use shared::singer::Record;

/// Every stream the tap can replicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Users,
    Transcripts,
    MeetingInfo,
    MeetingAttendees,
}

/// How a stream's records are pulled from the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// One unbounded request.
    Single,
    /// Walk `(fromDate, toDate)` windows backwards from now to the bookmark.
    TimeWindow,
    /// `limit`/`skip` pages, newest first, until the cutoff field drops
    /// below the cutoff.
    SkipWithCutoff { cutoff_field: &'static str },
}

/// Unit a stream's bookmark is persisted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookmarkFormat {
    Rfc3339,
    EpochMillis,
}

const USERS_QUERY: &str = r#"
query Users {
  users {
    user_id
    email
    name
    num_transcripts
    recent_meeting
    minutes_consumed
    is_admin
    integrations
    user_groups {
      name
      handle
    }
  }
}
"#;

const TRANSCRIPTS_QUERY: &str = r#"
query Transcripts($fromDate: DateTime, $toDate: DateTime, $limit: Int, $skip: Int) {
  transcripts(fromDate: $fromDate, toDate: $toDate, limit: $limit, skip: $skip) {
    id
    analytics {
      sentiments {
        negative_pct
        neutral_pct
        positive_pct
      }
      categories {
        questions
        date_times
        metrics
        tasks
      }
      speakers {
        speaker_id
        name
        duration
        word_count
        longest_monologue
        monologues_count
        filler_words
        questions
        duration_pct
        words_per_minute
      }
    }
    sentences {
      index
      speaker_id
      text
      start_time
      end_time
    }
    title
    speakers {
      id
      name
    }
    organizer_email
    meeting_link
    meeting_info {
      fred_joined
      silent_meeting
      summary_status
    }
    participants
    date
    duration
    meeting_attendees {
      displayName
      email
      phoneNumber
      name
      location
    }
    summary {
      keywords
      action_items
      outline
      shorthand_bullet
      overview
      bullet_gist
      gist
      short_summary
      short_overview
      meeting_type
    }
  }
}
"#;

const MEETING_INFO_QUERY: &str = r#"
query getMeetingInfo($limit: Int, $skip: Int) {
  transcripts(limit: $limit, skip: $skip) {
    id
    title
    meeting_datetime: date
    duration
    organizer_email
    host_email
    participants
    meeting_link
    transcript_url
    summary {
      keywords
      action_items
      outline
      overview
      shorthand_bullet
      bullet_gist
      gist
      short_summary
      meeting_type
    }
  }
}
"#;

const MEETING_ATTENDEES_QUERY: &str = r#"
query getMeetingAttendees($limit: Int, $skip: Int) {
  transcripts(limit: $limit, skip: $skip) {
    id
    title
    meeting_timestamp: date
    meeting_attendees {
      email
      phoneNumber
      location
      name
      displayName
    }
  }
}
"#;

/// Title markers of meetings held with customers.
const CUSTOMER_MEETING_MARKERS: &[&str] = &["| Vibe", "<>"];

pub fn is_customer_meeting(title: &str) -> bool {
    CUSTOMER_MEETING_MARKERS.iter().any(|m| title.contains(m))
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [
        StreamKind::Users,
        StreamKind::Transcripts,
        StreamKind::MeetingInfo,
        StreamKind::MeetingAttendees,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamKind::Users => "users",
            StreamKind::Transcripts => "transcripts",
            StreamKind::MeetingInfo => "meeting_info",
            StreamKind::MeetingAttendees => "meeting_attendees",
        }
    }

    pub fn key_properties(&self) -> &'static [&'static str] {
        match self {
            StreamKind::Users => &["user_id"],
            StreamKind::Transcripts | StreamKind::MeetingInfo => &["id"],
            StreamKind::MeetingAttendees => &["id", "email"],
        }
    }

    /// The replication key, which is also the key the bookmark is stored
    /// under. `None` for full-table streams.
    pub fn bookmark_key(&self) -> Option<&'static str> {
        match self {
            StreamKind::Users => None,
            StreamKind::Transcripts => Some("date"),
            StreamKind::MeetingInfo => Some("meeting_datetime"),
            StreamKind::MeetingAttendees => Some("meeting_timestamp"),
        }
    }

    pub fn replication_method(&self) -> ReplicationMethod {
        match self.bookmark_key() {
            Some(_) => ReplicationMethod::Incremental,
            None => ReplicationMethod::FullTable,
        }
    }

    pub fn bookmark_format(&self) -> BookmarkFormat {
        match self {
            StreamKind::Transcripts => BookmarkFormat::Rfc3339,
            _ => BookmarkFormat::EpochMillis,
        }
    }

    pub fn query(&self) -> &'static str {
        match self {
            StreamKind::Users => USERS_QUERY,
            StreamKind::Transcripts => TRANSCRIPTS_QUERY,
            StreamKind::MeetingInfo => MEETING_INFO_QUERY,
            StreamKind::MeetingAttendees => MEETING_ATTENDEES_QUERY,
        }
    }

    /// Field of `data` holding the records.
    pub fn result_field(&self) -> &'static str {
        match self {
            StreamKind::Users => "users",
            _ => "transcripts",
        }
    }

    pub fn fetch_strategy(&self) -> FetchStrategy {
        match self {
            StreamKind::Users => FetchStrategy::Single,
            StreamKind::Transcripts => FetchStrategy::TimeWindow,
            StreamKind::MeetingInfo => FetchStrategy::SkipWithCutoff {
                cutoff_field: "meeting_datetime",
            },
            StreamKind::MeetingAttendees => FetchStrategy::SkipWithCutoff {
                cutoff_field: "meeting_timestamp",
            },
        }
    }

    pub fn schema(&self) -> &'static str {
        match self {
            StreamKind::Users => include_str!("../schemas/users.json"),
            StreamKind::Transcripts => include_str!("../schemas/transcripts.json"),
            StreamKind::MeetingInfo => include_str!("../schemas/meeting_info.json"),
            StreamKind::MeetingAttendees => include_str!("../schemas/meeting_attendees.json"),
        }
    }

    /// Replication value of a raw API record, in milliseconds.
    pub fn replication_value(&self, record: &Record) -> Option<i64> {
        self.bookmark_key()
            .and_then(|key| replication_millis(record, key))
    }

    /// Whether a fetched record should be emitted. Incremental records must
    /// sit at or above the cutoff; meeting streams also keep only customer
    /// meetings.
    pub fn include_record(&self, record: &Record, cutoff_millis: i64) -> bool {
        if self.bookmark_key().is_some() {
            match self.replication_value(record) {
                Some(ts) if ts >= cutoff_millis => {}
                _ => return false,
            }
        }

        match self {
            StreamKind::Users | StreamKind::Transcripts => true,
            StreamKind::MeetingInfo | StreamKind::MeetingAttendees => record
                .get("title")
                .and_then(Value::as_str)
                .is_some_and(is_customer_meeting),
        }
    }

    /// Turns one included API record into the records emitted downstream.
    pub fn reshape(&self, record: Record) -> Result<Vec<Record>, FirefliesError> {
        match self {
            StreamKind::Users | StreamKind::Transcripts => Ok(vec![record]),
            StreamKind::MeetingInfo => {
                let row: MeetingInfoRow = from_record(self, record)?;
                Ok(vec![to_record(self, &MeetingInfoRecord::from(row))?])
            }
            StreamKind::MeetingAttendees => {
                let row: MeetingAttendeesRow = from_record(self, record)?;
                row.into_attendee_records()
                    .iter()
                    .map(|attendee| to_record(self, attendee))
                    .collect()
            }
        }
    }
}

fn from_record<T: serde::de::DeserializeOwned>(
    kind: &StreamKind,
    record: Record,
) -> Result<T, FirefliesError> {
    serde_json::from_value(Value::Object(record)).map_err(|e| FirefliesError::MissingField {
        context: kind.name().to_string(),
        field: e.to_string(),
    })
}

fn to_record<T: serde::Serialize>(kind: &StreamKind, value: &T) -> Result<Record, FirefliesError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(FirefliesError::BadResponse(format!(
            "could not reshape {} record",
            kind.name()
        ))),
    }
}
