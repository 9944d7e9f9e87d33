use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Fireflies returns `date` as a millisecond epoch, occasionally as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateValue {
    Timestamp(i64),
    Text(String),
}

impl DateValue {
    pub fn to_millis(&self) -> Option<i64> {
        match self {
            DateValue::Timestamp(ms) => Some(*ms),
            DateValue::Text(s) => s.parse::<i64>().ok().or_else(|| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.timestamp_millis())
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Summary {
    pub keywords: Option<Vec<String>>,
    pub action_items: Option<String>,
    pub outline: Option<String>,
    pub overview: Option<String>,
    pub shorthand_bullet: Option<String>,
    pub bullet_gist: Option<String>,
    pub gist: Option<String>,
    pub short_summary: Option<String>,
    pub meeting_type: Option<String>,
}

/// Row shape of the `meeting_info` query.
#[derive(Debug, Clone, Deserialize)]
pub struct MeetingInfoRow {
    pub id: String,
    pub title: Option<String>,
    pub meeting_datetime: Option<DateValue>,
    pub duration: Option<f64>,
    pub organizer_email: Option<String>,
    pub host_email: Option<String>,
    pub participants: Option<Vec<String>>,
    pub meeting_link: Option<String>,
    pub transcript_url: Option<String>,
    pub summary: Option<Summary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeetingInfoRecord {
    pub id: String,
    pub title: Option<String>,
    pub meeting_datetime: Option<i64>,
    pub meeting_category: MeetingCategory,
    pub duration: Option<f64>,
    pub organizer_email: Option<String>,
    pub host_email: Option<String>,
    pub participants: Option<Vec<String>>,
    pub meeting_link: Option<String>,
    pub transcript_url: Option<String>,
    pub summary_keywords: Option<Vec<String>>,
    pub summary_action_items: Option<String>,
    pub summary_outline: Option<String>,
    pub summary_overview: Option<String>,
    pub summary_shorthand_bullet: Option<String>,
    pub summary_bullet_gist: Option<String>,
    pub summary_gist: Option<String>,
    pub summary_short_summary: Option<String>,
    pub summary_meeting_type: Option<String>,
}

impl From<MeetingInfoRow> for MeetingInfoRecord {
    fn from(row: MeetingInfoRow) -> Self {
        let summary = row.summary.unwrap_or_default();
        let meeting_category = MeetingCategory::from_title(row.title.as_deref().unwrap_or(""));

        Self {
            id: row.id,
            meeting_datetime: row.meeting_datetime.as_ref().and_then(DateValue::to_millis),
            title: row.title,
            meeting_category,
            duration: row.duration,
            organizer_email: row.organizer_email,
            host_email: row.host_email,
            participants: row.participants,
            meeting_link: row.meeting_link,
            transcript_url: row.transcript_url,
            summary_keywords: summary.keywords,
            summary_action_items: summary.action_items,
            summary_outline: summary.outline,
            summary_overview: summary.overview,
            summary_shorthand_bullet: summary.shorthand_bullet,
            summary_bullet_gist: summary.bullet_gist,
            summary_gist: summary.gist,
            summary_short_summary: summary.short_summary,
            summary_meeting_type: summary.meeting_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingCategory {
    Demo,
    Onboarding,
    Kickoff,
    Renewal,
    Training,
    Support,
    CustomerCall,
}

impl MeetingCategory {
    /// First matching keyword in the title wins.
    pub fn from_title(title: &str) -> Self {
        const RULES: &[(&[&str], MeetingCategory)] = &[
            (&["demo"], MeetingCategory::Demo),
            (&["onboarding"], MeetingCategory::Onboarding),
            (&["kickoff", "kick-off", "kick off"], MeetingCategory::Kickoff),
            (&["renewal"], MeetingCategory::Renewal),
            (&["training"], MeetingCategory::Training),
            (&["support", "troubleshoot"], MeetingCategory::Support),
        ];

        let title = title.to_lowercase();
        RULES
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| title.contains(k)))
            .map(|(_, category)| *category)
            .unwrap_or(MeetingCategory::CustomerCall)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attendee {
    pub email: Option<String>,
    #[serde(rename = "phoneNumber")]
    pub phone_number: Option<String>,
    pub location: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
}

/// Row shape of the `meeting_attendees` query.
#[derive(Debug, Clone, Deserialize)]
pub struct MeetingAttendeesRow {
    pub id: String,
    pub title: Option<String>,
    pub meeting_timestamp: Option<DateValue>,
    #[serde(default)]
    pub meeting_attendees: Option<Vec<Attendee>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendeeRecord {
    pub id: String,
    pub meeting_timestamp: Option<i64>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub location: Option<String>,
    pub name: Option<String>,
}

impl MeetingAttendeesRow {
    /// One output record per attendee, each carrying the meeting's identity
    /// and timestamp.
    pub fn into_attendee_records(self) -> Vec<AttendeeRecord> {
        let meeting_timestamp = self.meeting_timestamp.as_ref().and_then(DateValue::to_millis);
        let id = self.id;

        self.meeting_attendees
            .unwrap_or_default()
            .into_iter()
            .map(|attendee| AttendeeRecord {
                id: id.clone(),
                meeting_timestamp,
                email: attendee.email,
                phone_number: attendee.phone_number,
                location: attendee.location,
                name: attendee.name.or(attendee.display_name),
            })
            .collect()
    }
}
