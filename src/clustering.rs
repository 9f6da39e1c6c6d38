//! Event clustering
//!
//! Photos are ordered by capture time and split into events wherever the gap
//! to the previous photo reaches the threshold, a photo has no usable time, or
//! the resolved place changes.

use chrono::{DateTime, Datelike, Duration, Local, NaiveDateTime, Utc};
use serde::Serialize;

use crate::record::EnhancedImageRecord;

/// Default gap between two photos that starts a new event
pub const DEFAULT_EVENT_GAP_HOURS: i64 = 3;

const UNKNOWN_DATE: &str = "Unknown Date";

/// Label plus the number of records that carry it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub label: String,
    pub count: usize,
}

/// "Jul 14" in `reference_year`, "Jul 14, 2023" otherwise
fn format_event_date(time: Option<NaiveDateTime>, reference_year: i32) -> String {
    match time {
        Some(t) if t.year() == reference_year => t.format("%b %-d").to_string(),
        Some(t) => t.format("%b %-d, %Y").to_string(),
        None => UNKNOWN_DATE.to_string(),
    }
}

fn event_label(number: usize, time: Option<NaiveDateTime>, place: Option<&str>, reference_year: i32) -> String {
    let date = format_event_date(time, reference_year);
    match place {
        Some(place) => format!("Event {}: {} - {}", number, date, place),
        None => format!("Event {}: {}", number, date),
    }
}

/// Stable sort by capture time. Undated records count as the Unix epoch.
pub fn sort_by_capture_time(records: &mut [EnhancedImageRecord]) {
    let epoch = DateTime::<Utc>::UNIX_EPOCH.naive_utc();
    records.sort_by_key(|r| r.capture_time.map(|c| c.local).unwrap_or(epoch));
}

/// Sort `records` by time and label every one of them with its event.
///
/// `reference_year` is the year whose dates are rendered without a year.
/// Returns the number of events created.
pub fn assign_event_groups(records: &mut [EnhancedImageRecord], gap: Duration, reference_year: i32) -> usize {
    sort_by_capture_time(records);

    let mut events = 0;
    let mut last_time: Option<NaiveDateTime> = None;
    let mut last_place: Option<String> = None;

    for i in 0..records.len() {
        let time = records[i].capture_time.map(|c| c.local);
        let place = records[i].place_name().map(str::to_string);

        let time_break = match (time, last_time) {
            (Some(t), Some(prev)) => t - prev >= gap,
            _ => true,
        };
        let place_break = matches!((&place, &last_place), (Some(a), Some(b)) if a != b);

        if i == 0 || time_break || place_break {
            events += 1;
            records[i].event_group_label = event_label(events, time, place.as_deref(), reference_year);
        } else {
            records[i].event_group_label = records[i - 1].event_group_label.clone();
        }

        last_time = time;
        last_place = place;
    }

    log::debug!("[Cluster] {} records in {} events", records.len(), events);
    events
}

/// `assign_event_groups` relative to the current calendar year
pub fn cluster_events(records: &mut [EnhancedImageRecord], gap: Duration) -> usize {
    assign_event_groups(records, gap, Local::now().year())
}

/// Event labels in order of first appearance, with record counts
pub fn summarize_events(records: &[EnhancedImageRecord]) -> Vec<EventSummary> {
    let mut summaries: Vec<EventSummary> = Vec::new();
    for record in records {
        match summaries.iter_mut().find(|s| s.label == record.event_group_label) {
            Some(summary) => summary.count += 1,
            None => summaries.push(EventSummary {
                label: record.event_group_label.clone(),
                count: 1,
            }),
        }
    }
    summaries
}
