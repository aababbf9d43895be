use chrono::{
  Datelike,
  NaiveDate,
  Weekday
};
use serde::{
  Deserialize,
  Serialize
};
use tracing::debug;

use crate::category::CategoryRegistry;
use crate::datetime::{
  add_days,
  days_in_month,
  first_day_of_month,
  month_name,
  shift_months,
  shift_years,
  start_of_week
};
use crate::event::{
  Event,
  Priority
};
use crate::layout::RowKey;

pub const WEEK_START: Weekday =
  Weekday::Sun;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
)]
#[serde(
  rename_all = "lowercase",
  from = "String"
)]
pub enum ViewKind {
  #[default]
  Month,
  Week,
  Year
}

impl ViewKind {
  pub fn as_key(self) -> &'static str {
    match self {
      | ViewKind::Month => "month",
      | ViewKind::Week => "week",
      | ViewKind::Year => "year"
    }
  }

  pub fn from_key(
    key: &str
  ) -> Option<Self> {
    match key
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "month" => Some(ViewKind::Month),
      | "week" => Some(ViewKind::Week),
      | "year" => Some(ViewKind::Year),
      | _ => None
    }
  }
}

impl From<String> for ViewKind {
  fn from(raw: String) -> Self {
    Self::from_key(&raw)
      .unwrap_or_default()
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
)]
#[serde(
  rename_all = "lowercase",
  from = "String"
)]
pub enum YearMode {
  #[default]
  List,
  Grid
}

impl YearMode {
  pub fn from_key(
    key: &str
  ) -> Option<Self> {
    match key
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "list" => Some(YearMode::List),
      | "grid" => Some(YearMode::Grid),
      | _ => None
    }
  }
}

impl From<String> for YearMode {
  fn from(raw: String) -> Self {
    Self::from_key(&raw)
      .unwrap_or_default()
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct ViewRequest {
  pub view:      ViewKind,
  pub reference: NaiveDate,
  pub year_mode: YearMode
}

/// One event placed in a bucket, with
/// its resolved category colour.
#[derive(Debug, Clone, Serialize)]
pub struct DayItem<'a> {
  pub event: &'a Event,
  pub color: &'a str,
  pub day:   u32
}

#[derive(Debug, Clone, Serialize)]
pub struct DayCell<'a> {
  pub date:             NaiveDate,
  pub in_current_month: bool,
  pub items:            Vec<DayItem<'a>>
}

impl DayCell<'_> {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct WeekRow<'a> {
  pub key:     RowKey,
  pub start:   NaiveDate,
  pub end:     NaiveDate,
  pub cells:   Vec<DayCell<'a>>,
  /// Every event of the 7-day span, in
  /// upstream order.
  pub summary: Vec<DayItem<'a>>
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthView<'a> {
  pub year:          i32,
  pub month:         u32,
  pub first_weekday: u32,
  pub days:          u32,
  pub rows:          Vec<WeekRow<'a>>
}

impl MonthView<'_> {
  pub fn row_keys(&self) -> Vec<RowKey> {
    self
      .rows
      .iter()
      .map(|row| row.key)
      .collect()
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct WeekView<'a> {
  pub start:   NaiveDate,
  pub end:     NaiveDate,
  pub days:    Vec<DayCell<'a>>,
  pub summary: Vec<DayItem<'a>>
}

#[derive(Debug, Clone, Serialize)]
pub struct YearListMonth<'a> {
  pub month: u32,
  pub name:  &'static str,
  pub items: Vec<DayItem<'a>>
}

/// How a mini-grid day is flagged.
#[derive(
  Debug, Clone, PartialEq, Eq, Serialize,
)]
pub enum DayMarker {
  None,
  /// High priority events, all in one
  /// category colour.
  Solid(String),
  /// High priority events in several
  /// colours, first-seen order.
  Blend(Vec<String>),
  /// Only medium/low events.
  Light
}

#[derive(Debug, Clone, Serialize)]
pub struct MiniDay {
  pub day:    u32,
  pub date:   NaiveDate,
  pub marker: DayMarker
}

#[derive(Debug, Clone, Serialize)]
pub struct YearGridMonth {
  pub month:          u32,
  pub name:           &'static str,
  pub leading_blanks: u32,
  pub days:           Vec<MiniDay>
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Projection<'a> {
  Month(MonthView<'a>),
  Week(WeekView<'a>),
  YearList {
    year:   i32,
    months: Vec<YearListMonth<'a>>
  },
  YearGrid {
    year:   i32,
    months: Vec<YearGridMonth>
  }
}

/// Turns already filtered and sorted
/// events into the view model for one
/// screen.
#[tracing::instrument(skip(
  events, categories
))]
pub fn project<'a>(
  events: &[&'a Event],
  categories: &'a CategoryRegistry,
  request: ViewRequest
) -> Projection<'a> {
  let projector = Projector {
    events,
    categories
  };
  match request.view {
    | ViewKind::Month => {
      Projection::Month(
        projector
          .month(request.reference)
      )
    }
    | ViewKind::Week => {
      Projection::Week(
        projector
          .week(request.reference)
      )
    }
    | ViewKind::Year => {
      let year =
        request.reference.year();
      match request.year_mode {
        | YearMode::List => {
          Projection::YearList {
            year,
            months: projector
              .year_list(year)
          }
        }
        | YearMode::Grid => {
          Projection::YearGrid {
            year,
            months: projector
              .year_grid(year)
          }
        }
      }
    }
  }
}

/// Moves the reference date one screen
/// forward (`step > 0`) or back.
pub fn shift_reference(
  view: ViewKind,
  current: NaiveDate,
  step: i32
) -> NaiveDate {
  match view {
    | ViewKind::Month => {
      shift_months(current, step)
    }
    | ViewKind::Week => {
      add_days(
        current,
        i64::from(step) * 7
      )
    }
    | ViewKind::Year => {
      shift_years(current, step)
    }
  }
}

struct Projector<'e, 'a> {
  events:     &'e [&'a Event],
  categories: &'a CategoryRegistry
}

impl<'a> Projector<'_, 'a> {
  fn item(
    &self,
    event: &'a Event
  ) -> DayItem<'a> {
    DayItem {
      event,
      color: self
        .categories
        .resolve(&event.category_id)
        .color,
      day: event.date.day()
    }
  }

  fn on_day(
    &self,
    date: NaiveDate
  ) -> Vec<DayItem<'a>> {
    self
      .events
      .iter()
      .filter(|event| event.date == date)
      .map(|event| self.item(*event))
      .collect()
  }

  fn within(
    &self,
    start: NaiveDate,
    end: NaiveDate
  ) -> Vec<DayItem<'a>> {
    self
      .events
      .iter()
      .filter(|event| {
        event.date >= start
          && event.date <= end
      })
      .map(|event| self.item(*event))
      .collect()
  }

  fn month(
    &self,
    reference: NaiveDate
  ) -> MonthView<'a> {
    let year = reference.year();
    let month = reference.month();
    let first =
      first_day_of_month(year, month);
    let first_weekday = first
      .weekday()
      .num_days_from_sunday();
    let days = days_in_month(year, month);
    let row_count =
      (first_weekday + days).div_ceil(7);

    let mut cursor = add_days(
      first,
      -i64::from(first_weekday)
    );
    let mut rows =
      Vec::with_capacity(
        row_count as usize
      );
    for _ in 0..row_count {
      let start = cursor;
      let cells = (0..7)
        .map(|offset| {
          let date =
            add_days(start, offset);
          DayCell {
            date,
            in_current_month: date
              .month()
              == month
              && date.year() == year,
            items: self.on_day(date)
          }
        })
        .collect();
      let end = add_days(start, 6);
      rows.push(WeekRow {
        key: RowKey::new(start),
        start,
        end,
        cells,
        summary: self.within(start, end)
      });
      cursor = add_days(start, 7);
    }

    debug!(
      year,
      month,
      rows = rows.len(),
      "projected month"
    );
    MonthView {
      year,
      month,
      first_weekday,
      days,
      rows
    }
  }

  fn week(
    &self,
    reference: NaiveDate
  ) -> WeekView<'a> {
    let start =
      start_of_week(reference, WEEK_START);
    let end = add_days(start, 6);
    let days = (0..7)
      .map(|offset| {
        let date =
          add_days(start, offset);
        DayCell {
          date,
          in_current_month: true,
          items: self.on_day(date)
        }
      })
      .collect();

    WeekView {
      start,
      end,
      days,
      summary: self.within(start, end)
    }
  }

  fn year_list(
    &self,
    year: i32
  ) -> Vec<YearListMonth<'a>> {
    (1..=12)
      .map(|month| {
        YearListMonth {
          month,
          name: month_name(month),
          items: self
            .events
            .iter()
            .filter(|event| {
              event.date.year() == year
                && event.date.month()
                  == month
            })
            .map(|event| {
              self.item(*event)
            })
            .collect()
        }
      })
      .collect()
  }

  fn year_grid(
    &self,
    year: i32
  ) -> Vec<YearGridMonth> {
    (1..=12)
      .map(|month| {
        let first = first_day_of_month(
          year, month
        );
        let days = (1
          ..=days_in_month(year, month))
          .map(|day| {
            let date = add_days(
              first,
              i64::from(day) - 1
            );
            MiniDay {
              day,
              date,
              marker: self
                .marker_for(date)
            }
          })
          .collect();
        YearGridMonth {
          month,
          name: month_name(month),
          leading_blanks: first
            .weekday()
            .num_days_from_sunday(),
          days
        }
      })
      .collect()
  }

  fn marker_for(
    &self,
    date: NaiveDate
  ) -> DayMarker {
    let items = self.on_day(date);
    if items.is_empty() {
      return DayMarker::None;
    }

    let mut colors: Vec<String> =
      Vec::new();
    for item in items.iter().filter(
      |item| {
        item.event.priority
          == Priority::High
      }
    ) {
      if !colors
        .iter()
        .any(|c| c == item.color)
      {
        colors
          .push(item.color.to_string());
      }
    }

    match colors.len() {
      | 0 => DayMarker::Light,
      | 1 => {
        DayMarker::Solid(
          colors.remove(0)
        )
      }
      | _ => DayMarker::Blend(colors)
    }
  }
}
