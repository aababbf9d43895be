use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use serde::{
  Deserialize,
  Serialize
};
use tracing::{
  info,
  warn
};

use crate::app::Calendar;
use crate::event::{
  Category,
  Event,
  Id,
  Priority
};

pub const HOLIDAY_CATEGORY_NAME: &str =
  "Public Holiday";
pub const HOLIDAY_CATEGORY_COLOR: &str =
  "#ef4444";
pub const DEFAULT_ENDPOINT: &str =
  "https://date.nager.at/api/v3/PublicHolidays";
pub const DEFAULT_COUNTRY: &str = "BR";
pub const DEFAULT_YEARS: [i32; 3] =
  [2025, 2026, 2027];

/// One entry of the public holiday API.
#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct PublicHoliday {
  pub date:       NaiveDate,
  pub local_name: String,
  #[serde(default)]
  pub name:       String
}

impl PublicHoliday {
  /// Stable per date and local name so
  /// repeated imports skip known days.
  pub fn event_id(&self) -> Id {
    let compact: String = self
      .local_name
      .split_whitespace()
      .collect();
    Id::new(format!(
      "hol_{}_{compact}",
      self.date.format("%Y-%m-%d")
    ))
  }

  fn into_event(
    self,
    category_id: &Id
  ) -> Event {
    Event {
      id:          self.event_id(),
      description: format!(
        "{} (Public Holiday)",
        self.name
      ),
      name:        self.local_name,
      date:        self.date,
      category_id: category_id.clone(),
      priority:    Priority::High
    }
  }
}

/// Where holiday lists come from.
pub trait HolidaySource {
  fn fetch(
    &self,
    year: i32,
    country: &str
  ) -> anyhow::Result<Vec<PublicHoliday>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolidaySettings {
  pub country:  String,
  pub years:    Vec<i32>,
  pub endpoint: String
}

impl Default for HolidaySettings {
  fn default() -> Self {
    Self {
      country:  DEFAULT_COUNTRY
        .to_string(),
      years:    DEFAULT_YEARS.to_vec(),
      endpoint: DEFAULT_ENDPOINT
        .to_string()
    }
  }
}

/// Blocking HTTP client for the
/// date.nager.at API.
pub struct NagerClient {
  client:   reqwest::blocking::Client,
  endpoint: String
}

impl NagerClient {
  pub fn new(
    endpoint: &str
  ) -> anyhow::Result<Self> {
    let client =
      reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .context(
          "failed building HTTP client \
           for holiday import"
        )?;
    Ok(Self {
      client,
      endpoint: endpoint
        .trim_end_matches('/')
        .to_string()
    })
  }
}

impl HolidaySource for NagerClient {
  #[tracing::instrument(skip(self))]
  fn fetch(
    &self,
    year: i32,
    country: &str
  ) -> anyhow::Result<Vec<PublicHoliday>> {
    let url = format!(
      "{}/{year}/{country}",
      self.endpoint
    );
    let response = self
      .client
      .get(url.as_str())
      .header(
        reqwest::header::ACCEPT,
        "application/json"
      )
      .send()
      .with_context(|| {
        format!(
          "failed requesting holidays: \
           {url}"
        )
      })?;

    let status = response.status();
    if !status.is_success() {
      anyhow::bail!(
        "holiday request failed with \
         HTTP {status}: {url}"
      );
    }

    response.json().with_context(|| {
      format!(
        "failed decoding holiday list \
         from {url}"
      )
    })
  }
}

#[derive(
  Debug, Clone, PartialEq, Eq, Serialize,
)]
pub struct HolidayReport {
  pub category_id:      Id,
  pub category_created: bool,
  pub added:            usize,
  pub skipped:          usize,
  pub failed_years:     Vec<i32>,
  /// Every requested year failed.
  pub offline:          bool
}

impl HolidayReport {
  pub fn changed(&self) -> bool {
    self.category_created
      || self.added > 0
  }
}

/// Merges public holidays into the
/// calendar. Years that fail are
/// skipped, holidays fetched before a
/// failure stay merged.
#[tracing::instrument(skip(
  calendar, source, settings
), fields(
  country = %settings.country,
  years = ?settings.years
))]
pub fn import_holidays(
  calendar: &mut Calendar,
  source: &dyn HolidaySource,
  settings: &HolidaySettings
) -> HolidayReport {
  let (category_id, category_created) =
    ensure_holiday_category(calendar);

  let mut added = 0;
  let mut skipped = 0;
  let mut failed_years = Vec::new();
  for &year in &settings.years {
    let holidays = match source
      .fetch(year, &settings.country)
    {
      | Ok(holidays) => holidays,
      | Err(error) => {
        warn!(
          year,
          error = %format!("{error:#}"),
          "skipping holiday year"
        );
        failed_years.push(year);
        continue;
      }
    };

    for holiday in holidays {
      if calendar
        .events
        .insert(
          holiday
            .into_event(&category_id)
        )
      {
        added += 1;
      } else {
        skipped += 1;
      }
    }
  }

  let offline = !settings
    .years
    .is_empty()
    && failed_years.len()
      == settings.years.len();
  info!(
    added,
    skipped,
    failed = failed_years.len(),
    offline,
    "holiday import finished"
  );

  HolidayReport {
    category_id,
    category_created,
    added,
    skipped,
    failed_years,
    offline
  }
}

fn ensure_holiday_category(
  calendar: &mut Calendar
) -> (Id, bool) {
  let existing = calendar
    .categories
    .find_by_name(HOLIDAY_CATEGORY_NAME)
    .map(|cat| cat.id.clone());

  let (id, created) = match existing {
    | Some(id) => (id, false),
    | None => {
      let id = Id::new(format!(
        "holidays_{}",
        chrono::Utc::now()
          .timestamp_millis()
      ));
      calendar.categories.upsert(
        Category {
          id:    id.clone(),
          name:  HOLIDAY_CATEGORY_NAME
            .to_string(),
          color: HOLIDAY_CATEGORY_COLOR
            .to_string()
        }
      );
      (id, true)
    }
  };
  calendar.filters.activate_category(&id);
  (id, created)
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use super::*;

  struct FakeSource {
    by_year:
      BTreeMap<i32, Vec<PublicHoliday>>
  }

  impl HolidaySource for FakeSource {
    fn fetch(
      &self,
      year: i32,
      _country: &str
    ) -> anyhow::Result<Vec<PublicHoliday>>
    {
      self
        .by_year
        .get(&year)
        .cloned()
        .ok_or_else(|| {
          anyhow::anyhow!(
            "HTTP 404 for {year}"
          )
        })
    }
  }

  fn holiday(
    date: &str,
    local: &str,
    name: &str
  ) -> PublicHoliday {
    PublicHoliday {
      date:       date
        .parse()
        .expect("date"),
      local_name: local.to_string(),
      name:       name.to_string()
    }
  }

  fn source() -> FakeSource {
    FakeSource {
      by_year: BTreeMap::from([
        (2025, vec![
          holiday(
            "2025-01-01",
            "Confraternização Universal",
            "New Year's Day"
          ),
          holiday(
            "2025-12-25",
            "Natal",
            "Christmas Day"
          ),
        ]),
        (2026, vec![holiday(
          "2026-01-01",
          "Confraternização Universal",
          "New Year's Day"
        )])
      ])
    }
  }

  #[test]
  fn import_builds_deterministic_events()
  {
    let mut calendar = Calendar::default();
    let report = import_holidays(
      &mut calendar,
      &source(),
      &HolidaySettings::default()
    );

    assert_eq!(report.added, 3);
    assert_eq!(
      report.failed_years,
      vec![2027]
    );
    assert!(!report.offline);
    assert!(report.category_created);
    assert!(
      report
        .category_id
        .as_str()
        .starts_with("holidays_")
    );
    assert!(
      calendar
        .filters
        .active_categories
        .contains(&report.category_id)
    );

    let event = calendar
      .events
      .get(&Id::from(
        "hol_2025-01-01_ConfraternizaçãoUniversal"
      ))
      .expect("new year event");
    assert_eq!(
      event.name,
      "Confraternização Universal"
    );
    assert_eq!(
      event.description,
      "New Year's Day (Public Holiday)"
    );
    assert_eq!(
      event.priority,
      Priority::High
    );
    assert_eq!(
      event.category_id,
      report.category_id
    );
  }

  #[test]
  fn import_is_idempotent_and_reuses_category()
  {
    let mut calendar = Calendar::default();
    let settings =
      HolidaySettings::default();
    let first = import_holidays(
      &mut calendar,
      &source(),
      &settings
    );
    let count = calendar.events.len();
    let categories =
      calendar.categories.len();

    let second = import_holidays(
      &mut calendar,
      &source(),
      &settings
    );
    assert_eq!(second.added, 0);
    assert_eq!(second.skipped, 3);
    assert!(!second.changed());
    assert_eq!(
      second.category_id,
      first.category_id
    );
    assert_eq!(
      calendar.events.len(),
      count
    );
    assert_eq!(
      calendar.categories.len(),
      categories
    );
  }

  #[test]
  fn every_year_failing_reports_offline()
  {
    let mut calendar = Calendar::default();
    let settings = HolidaySettings {
      years: vec![1999, 2000],
      ..HolidaySettings::default()
    };
    let report = import_holidays(
      &mut calendar,
      &source(),
      &settings
    );
    assert!(report.offline);
    assert_eq!(report.added, 0);
    assert!(calendar.events.is_empty());
  }

  #[test]
  fn decodes_api_payload() {
    let raw = r#"[{"date":"2025-04-21","localName":"Dia de Tiradentes","name":"Tiradentes","countryCode":"BR","global":true}]"#;
    let list: Vec<PublicHoliday> =
      serde_json::from_str(raw)
        .expect("payload");
    assert_eq!(
      list[0].event_id().as_str(),
      "hol_2025-04-21_DiadeTiradentes"
    );
  }
}
