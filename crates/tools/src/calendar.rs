//! Google Calendar tool.
//!
//! Reads upcoming events from the user's primary calendar using a
//! pre-authorized token stored in a credentials JSON file. The same
//! fetch path backs both the agent tool and the HTTP calendar route.

use async_trait::async_trait;
use chrono::{NaiveDate, SecondsFormat, Utc};
use deskmate_core::error::ToolError;
use deskmate_core::tool::{Tool, ToolResult};
use serde::Deserialize;
use std::path::PathBuf;

const CALENDAR_EVENTS_URL: &str =
    "https://www.googleapis.com/calendar/v3/calendars/primary/events";

/// Default number of events returned when the caller does not ask for more.
pub const DEFAULT_EVENT_LIMIT: usize = 10;

/// Read upcoming events from the user's Google Calendar.
pub struct GoogleCalendarTool {
    credentials_path: PathBuf,
    client: reqwest::Client,
}

/// Credentials file layout. Either field may carry the bearer token,
/// depending on which OAuth tooling produced the file.
#[derive(Debug, Deserialize)]
struct CalendarCredentials {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

impl CalendarCredentials {
    fn bearer(&self) -> Option<&str> {
        self.access_token.as_deref().or(self.token.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<CalendarEvent>,
}

#[derive(Debug, Deserialize)]
struct CalendarEvent {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    start: Option<EventTime>,
    #[serde(default)]
    location: Option<String>,
}

/// Timed events carry `dateTime`; all-day events carry `date`.
#[derive(Debug, Deserialize)]
struct EventTime {
    #[serde(default, rename = "dateTime")]
    date_time: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

impl EventTime {
    fn display(&self) -> &str {
        self.date_time
            .as_deref()
            .or(self.date.as_deref())
            .unwrap_or("unknown")
    }
}

/// Lower bound for the event query. A bare `YYYY-MM-DD` becomes the
/// start of that day in UTC; anything else is passed through untouched
/// so callers can supply a full RFC 3339 timestamp.
fn resolve_time_min(date_from: Option<&str>) -> String {
    match date_from {
        Some(date) => match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            Ok(day) => format!("{day}T00:00:00Z"),
            Err(_) => date.to_string(),
        },
        None => Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }
}

fn format_events(events: &[CalendarEvent]) -> String {
    if events.is_empty() {
        return "No upcoming events found.".to_string();
    }
    let mut output = String::from("Upcoming events:\n");
    for event in events {
        let summary = event.summary.as_deref().unwrap_or("(no title)");
        let start = event
            .start
            .as_ref()
            .map(EventTime::display)
            .unwrap_or("unknown");
        output.push_str(&format!("- {summary}: {start}"));
        if let Some(location) = &event.location {
            output.push_str(&format!(" @ {location}"));
        }
        output.push('\n');
    }
    output.trim_end().to_string()
}

impl GoogleCalendarTool {
    pub fn new(credentials_path: impl Into<PathBuf>) -> Self {
        Self {
            credentials_path: credentials_path.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn load_bearer_token(&self) -> Result<String, ToolError> {
        let raw = tokio::fs::read_to_string(&self.credentials_path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "calendar_events".into(),
                reason: format!("failed to read credentials file: {e}"),
            })?;
        let credentials: CalendarCredentials =
            serde_json::from_str(&raw).map_err(|e| ToolError::ExecutionFailed {
                tool_name: "calendar_events".into(),
                reason: format!("invalid credentials file: {e}"),
            })?;
        credentials
            .bearer()
            .map(str::to_string)
            .ok_or_else(|| ToolError::ExecutionFailed {
                tool_name: "calendar_events".into(),
                reason: "credentials file has no access token".into(),
            })
    }

    /// Fetch up to `limit` upcoming events, formatted as a plain-text list.
    pub async fn list_events(
        &self,
        limit: usize,
        date_from: Option<&str>,
    ) -> Result<String, ToolError> {
        let token = self.load_bearer_token().await?;
        let time_min = resolve_time_min(date_from);

        let response = self
            .client
            .get(CALENDAR_EVENTS_URL)
            .bearer_auth(token)
            .query(&[
                ("maxResults", limit.to_string()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("timeMin", time_min),
            ])
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "calendar_events".into(),
                reason: format!("request failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ToolError::ExecutionFailed {
                tool_name: "calendar_events".into(),
                reason: format!("calendar API returned HTTP {status}"),
            });
        }

        let events: EventList = response.json().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: "calendar_events".into(),
            reason: format!("failed to parse calendar response: {e}"),
        })?;

        tracing::debug!(count = events.items.len(), "Fetched calendar events");
        Ok(format_events(&events.items))
    }
}

#[async_trait]
impl Tool for GoogleCalendarTool {
    fn name(&self) -> &str {
        "calendar_events"
    }

    fn description(&self) -> &str {
        "Get upcoming events from the user's Google Calendar."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of events to return (default 10)",
                    "default": DEFAULT_EVENT_LIMIT
                },
                "date_from": {
                    "type": "string",
                    "description": "Only include events starting on or after this date (YYYY-MM-DD)"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let limit = arguments["limit"]
            .as_u64()
            .unwrap_or(DEFAULT_EVENT_LIMIT as u64)
            .min(50) as usize;
        let date_from = arguments["date_from"].as_str();

        match self.list_events(limit, date_from).await {
            Ok(output) => Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output,
                data: None,
            }),
            Err(e) => Ok(ToolResult {
                call_id: String::new(),
                success: false,
                output: format!("Error fetching calendar events: {e}"),
                data: None,
            }),
        }
    }
}
