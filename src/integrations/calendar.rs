use crate::config::GoogleConfig;
use crate::integrations::token::TokenStore;
use crate::models::MealTime;
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone};
use log::{error, info, warn};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;

const EVENT_DURATION_MINUTES: i64 = 30;

#[derive(Clone, Debug, PartialEq)]
pub struct CalendarEventRequest {
    pub date: NaiveDate,
    pub meal_time: MealTime,
    pub title: String,
}

impl CalendarEventRequest {
    pub fn summary(&self) -> String {
        format!("{}: {}", self.meal_time, self.title)
    }
}

/// Best-effort calendar writes. Implementations report failure through the
/// return value only.
pub trait CalendarSync: Send + Sync {
    fn create_event(&self, event: &CalendarEventRequest) -> Option<String>;
    fn delete_event(&self, event_id: &str) -> bool;
}

/// Writes to the user's primary Google calendar.
pub struct GoogleCalendar {
    client: Client,
    api_base: String,
    description: String,
    time_zone: String,
    tokens: Arc<TokenStore>,
}

#[derive(Serialize)]
struct EventDateTime {
    #[serde(rename = "dateTime")]
    date_time: String,
    #[serde(rename = "timeZone")]
    time_zone: String,
}

#[derive(Serialize)]
struct EventInsertRequest {
    summary: String,
    description: String,
    start: EventDateTime,
    end: EventDateTime,
}

#[derive(Deserialize)]
struct CreatedEvent {
    id: Option<String>,
}

impl GoogleCalendar {
    pub fn new(config: &GoogleConfig, tokens: Arc<TokenStore>) -> Self {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_seconds.max(5)))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_base: config.calendar_api.trim_end_matches('/').to_string(),
            description: config.event_description.clone(),
            time_zone: resolve_time_zone(&config.time_zone),
            tokens,
        }
    }

    fn events_url(&self) -> String {
        format!("{}/calendars/primary/events", self.api_base)
    }
}

impl CalendarSync for GoogleCalendar {
    fn create_event(&self, event: &CalendarEventRequest) -> Option<String> {
        let token = match self.tokens.access_token() {
            Ok(token) => token,
            Err(err) => {
                warn!("Skipping calendar event for {}: {}", event.title, err);
                return None;
            }
        };
        let Some((start, end)) = event_window(event.date, event.meal_time) else {
            warn!("No valid local start time for {} on {}", event.meal_time, event.date);
            return None;
        };

        let body = EventInsertRequest {
            summary: event.summary(),
            description: self.description.clone(),
            start: EventDateTime {
                date_time: start.to_rfc3339(),
                time_zone: self.time_zone.clone(),
            },
            end: EventDateTime {
                date_time: end.to_rfc3339(),
                time_zone: self.time_zone.clone(),
            },
        };

        let resp = match self
            .client
            .post(self.events_url())
            .bearer_auth(&token)
            .json(&body)
            .send()
        {
            Ok(resp) => resp,
            Err(err) => {
                error!("Calendar create failed: {}", err);
                return None;
            }
        };

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("Calendar rejected the access token (HTTP 401); reconnect Google");
            return None;
        }
        if !status.is_success() {
            warn!("Calendar create failed: HTTP {}", status);
            return None;
        }

        match resp.json::<CreatedEvent>() {
            Ok(CreatedEvent { id: Some(id) }) if !id.is_empty() => {
                info!("Meal added to calendar: {}", id);
                Some(id)
            }
            Ok(_) => {
                warn!("Calendar create succeeded without an event id");
                None
            }
            Err(err) => {
                warn!("Calendar create response unreadable: {}", err);
                None
            }
        }
    }

    fn delete_event(&self, event_id: &str) -> bool {
        if event_id.trim().is_empty() {
            return false;
        }
        let token = match self.tokens.access_token() {
            Ok(token) => token,
            Err(err) => {
                warn!("Cannot delete calendar event {}: {}", event_id, err);
                return false;
            }
        };

        let url = format!("{}/{}", self.events_url(), event_id);
        let resp = match self.client.delete(url).bearer_auth(&token).send() {
            Ok(resp) => resp,
            Err(err) => {
                error!("Calendar delete failed: {}", err);
                return false;
            }
        };

        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            info!("Calendar event {} removed", event_id);
            return true;
        }
        if status == StatusCode::UNAUTHORIZED {
            warn!("Calendar rejected the access token (HTTP 401); reconnect Google");
        } else {
            warn!("Calendar delete failed: HTTP {}", status);
        }
        false
    }
}

/// Start and end of the meal's slot in local time. A start that falls in a
/// DST gap is pushed forward an hour.
pub fn event_window(
    date: NaiveDate,
    meal_time: MealTime,
) -> Option<(DateTime<Local>, DateTime<Local>)> {
    let naive = NaiveDateTime::new(date, meal_time.slot_time());
    let start = Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(naive + Duration::hours(1))).earliest())?;
    Some((start, start + Duration::minutes(EVENT_DURATION_MINUTES)))
}

/// Configured name first, then `TZ`, then the zone the OS reports. The
/// label has to agree with the offset `Local` puts on `dateTime`.
fn resolve_time_zone(configured: &str) -> String {
    if !configured.trim().is_empty() {
        return configured.trim().to_string();
    }
    std::env::var("TZ")
        .ok()
        .map(|tz| tz.trim_start_matches(':').trim().to_string())
        .filter(|tz| !tz.is_empty() && !tz.starts_with('/'))
        .or_else(|| match iana_time_zone::get_timezone() {
            Ok(tz) => Some(tz),
            Err(err) => {
                warn!("Could not read the system time zone: {}", err);
                None
            }
        })
        .unwrap_or_else(|| "UTC".to_string())
}
