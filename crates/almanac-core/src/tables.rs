use std::ops::RangeInclusive;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::category::CategoryRegistry;
use crate::datetime::{add_days, first_day_of_month, month_name, weekday_name};
use crate::event::Event;

/// Years on each side of the current one covered by the `dates` table.
pub const DATE_WINDOW_RADIUS: i32 = 2;

/// One event flattened together with its category and calendar fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRow {
    pub id: String,
    pub name: String,
    pub date: String,
    pub priority: String,
    pub description: String,
    pub category_name: String,
    pub category_color: String,
    pub day_name: String,
    pub month_name: String,
    pub year: i32,
    pub day: u32,
}

impl EventRow {
    pub const COLUMNS: [&'static str; 11] = [
        "id",
        "name",
        "date",
        "priority",
        "description",
        "category_name",
        "category_color",
        "day_name",
        "month_name",
        "year",
        "day",
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateRow {
    pub date: String,
    pub day_name: String,
    pub year: i32,
}

impl DateRow {
    pub const COLUMNS: [&'static str; 3] = ["date", "day_name", "year"];
}

/// The two queryable tables handed to a query engine.
#[derive(Debug, Clone, Default)]
pub struct QueryTables {
    pub events: Vec<EventRow>,
    pub dates: Vec<DateRow>,
}

impl QueryTables {
    pub fn build(events: &[Event], categories: &CategoryRegistry, today: NaiveDate) -> Self {
        Self {
            events: build_event_rows(events, categories),
            dates: build_date_dimension(default_year_window(today)),
        }
    }
}

pub fn build_event_rows(events: &[Event], categories: &CategoryRegistry) -> Vec<EventRow> {
    events
        .iter()
        .map(|event| {
            let category = categories.resolve(&event.category_id);
            EventRow {
                id: event.id.to_string(),
                name: event.name.clone(),
                date: format_date(event.date),
                priority: event.priority.as_str().to_string(),
                description: event.description.clone(),
                category_name: category.name.to_string(),
                category_color: category.color.to_string(),
                day_name: weekday_name(event.date).to_string(),
                month_name: month_name(event.date.month()).to_string(),
                year: event.date.year(),
                day: event.date.day(),
            }
        })
        .collect()
}

/// One row per calendar day from January 1 of the first year through
/// December 31 of the last.
pub fn build_date_dimension(years: RangeInclusive<i32>) -> Vec<DateRow> {
    let (first, last) = (*years.start(), *years.end());
    if first > last {
        return Vec::new();
    }

    let start = first_day_of_month(first, 1);
    let end = add_days(first_day_of_month(last.saturating_add(1), 1), -1);
    let mut rows = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        rows.push(DateRow {
            date: format_date(cursor),
            day_name: weekday_name(cursor).to_string(),
            year: cursor.year(),
        });
        let next = add_days(cursor, 1);
        if next == cursor {
            break;
        }
        cursor = next;
    }
    debug!(first, last, rows = rows.len(), "built date dimension");
    rows
}

pub fn default_year_window(today: NaiveDate) -> RangeInclusive<i32> {
    let year = today.year();
    (year - DATE_WINDOW_RADIUS)..=(year + DATE_WINDOW_RADIUS)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::event::{EventDraft, Id, NEUTRAL_COLOR, Priority};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn event_rows_join_categories_and_calendar_fields() {
        let categories: CategoryRegistry = serde_json::from_str(
            r##"[{"id":"w","name":"Work","color":"#3b82f6"}]"##,
        )
        .expect("categories");

        let mut known = EventDraft::new("Review", date(2025, 6, 15));
        known.category_id = Id::from("w");
        known.priority = Priority::High;
        let mut dangling = EventDraft::new("Orphan", date(2024, 2, 29));
        dangling.category_id = Id::from("removed");

        let events = vec![
            Event::from_draft(Id::from("1"), known),
            Event::from_draft(Id::from("2"), dangling),
        ];
        let rows = build_event_rows(&events, &categories);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "1");
        assert_eq!(rows[0].category_name, "Work");
        assert_eq!(rows[0].day_name, "Sunday");
        assert_eq!(rows[0].month_name, "June");
        assert_eq!(rows[0].priority, "high");
        assert_eq!((rows[0].year, rows[0].day), (2025, 15));

        assert_eq!(rows[1].id, "2");
        assert_eq!(rows[1].category_name, "");
        assert_eq!(rows[1].category_color, NEUTRAL_COLOR);
        assert_eq!(rows[1].day_name, "Thursday");
    }

    #[test]
    fn date_dimension_spans_five_years() {
        let window = default_year_window(date(2025, 10, 1));
        assert_eq!(window, 2023..=2027);

        let rows = build_date_dimension(window);
        // 2024 is the only leap year in the window
        assert_eq!(rows.len(), 365 * 5 + 1);

        let unique: BTreeSet<&str> = rows.iter().map(|row| row.date.as_str()).collect();
        assert_eq!(unique.len(), rows.len());
        assert_eq!(rows[0].date, "2023-01-01");
        assert_eq!(rows[0].day_name, "Sunday");
        assert_eq!(rows.last().map(|row| row.date.as_str()), Some("2027-12-31"));
        assert!(rows.iter().all(|row| row.date.starts_with(&row.year.to_string())));
    }
}
