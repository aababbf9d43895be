use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  Datelike,
  Duration,
  Months,
  NaiveDate,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "almanac-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "ALMANAC_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "ALMANAC_TIME_CONFIG";
const DEFAULT_PROJECT_TIMEZONE: &str =
  "America/Sao_Paulo";

pub const WEEKDAY_NAMES: [&str; 7] = [
  "Sunday",
  "Monday",
  "Tuesday",
  "Wednesday",
  "Thursday",
  "Friday",
  "Saturday"
];

pub const MONTH_NAMES: [&str; 12] = [
  "January",
  "February",
  "March",
  "April",
  "May",
  "June",
  "July",
  "August",
  "September",
  "October",
  "November",
  "December"
];

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(
    resolve_project_timezone
  )
}

/// Calendar date "now" in the project
/// timezone.
#[must_use]
pub fn today() -> NaiveDate {
  Utc::now()
    .with_timezone(project_timezone())
    .date_naive()
}

fn resolve_project_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(
        &raw,
        TIMEZONE_ENV_VAR
      )
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_PROJECT_TIMEZONE,
    "DEFAULT_PROJECT_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Parses a user supplied date relative
/// to `today`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_date_arg(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" => return Ok(today),
    | "tomorrow" => {
      return Ok(add_days(today, 1));
    }
    | "yesterday" => {
      return Ok(add_days(today, -1));
    }
    | _ => {}
  }

  if let Some(weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today, weekday
    ));
  }

  let rel_re = Regex::new(
    r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dwmy])$"
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let negative = caps
      .name("sign")
      .map(|m| m.as_str() == "-")
      .unwrap_or(false);
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let num =
      if negative { -num } else { num };
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .unwrap_or("d");

    let shifted = match unit {
      | "w" => num
        .checked_mul(7)
        .and_then(|days| {
          checked_add_days(today, days)
        }),
      | "m" => i32::try_from(num)
        .ok()
        .and_then(|months| {
          checked_shift_months(
            today, months
          )
        }),
      | "y" => i32::try_from(num)
        .ok()
        .and_then(|years| {
          checked_shift_years(
            today, years
          )
        }),
      | _ => checked_add_days(today, num)
    };
    return shifted.ok_or_else(|| {
      anyhow!(
        "relative date out of range: \
         {input}"
      )
    });
  }

  for fmt in ["%Y-%m-%d", "%Y%m%d"] {
    if let Ok(date) =
      NaiveDate::parse_from_str(
        token, fmt
      )
    {
      return Ok(date);
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     today/tomorrow/yesterday, \
     weekday names (e.g. monday), \
     +Nd/+Nw/+Nm/+Ny, YYYY-MM-DD, \
     YYYYMMDD"
  })
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_sunday()
    as i64;
  let target_idx = target
    .num_days_from_sunday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  add_days(from, delta)
}

#[must_use]
pub fn weekday_name(
  date: NaiveDate
) -> &'static str {
  WEEKDAY_NAMES[date
    .weekday()
    .num_days_from_sunday()
    as usize]
}

#[must_use]
pub fn month_name(
  month: u32
) -> &'static str {
  MONTH_NAMES[(month.clamp(1, 12) - 1)
    as usize]
}

pub fn first_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(NaiveDate::MIN)
}

pub fn last_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  add_days(
    first_day_of_month(
      next_year, next_month
    ),
    -1
  )
}

pub fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  last_day_of_month(year, month).day()
}

/// Saturating form of
/// [`checked_add_days`]: out of range
/// results leave `date` unchanged.
pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  checked_add_days(date, days)
    .unwrap_or(date)
}

pub fn checked_add_days(
  date: NaiveDate,
  days: i64
) -> Option<NaiveDate> {
  Duration::try_days(days).and_then(
    |delta| date.checked_add_signed(delta)
  )
}

pub fn start_of_week(
  day: NaiveDate,
  week_start: Weekday
) -> NaiveDate {
  let day_idx = day
    .weekday()
    .num_days_from_sunday()
    as i64;
  let start_idx = week_start
    .num_days_from_sunday()
    as i64;
  let diff =
    (7 + day_idx - start_idx) % 7;
  add_days(day, -diff)
}

pub fn shift_years(
  date: NaiveDate,
  years: i32
) -> NaiveDate {
  checked_shift_years(date, years)
    .unwrap_or(date)
}

pub fn checked_shift_years(
  date: NaiveDate,
  years: i32
) -> Option<NaiveDate> {
  checked_shift_months(
    date,
    years.checked_mul(12)?
  )
}

pub fn shift_months(
  date: NaiveDate,
  months: i32
) -> NaiveDate {
  checked_shift_months(date, months)
    .unwrap_or(date)
}

/// Moves by whole months, clamping the
/// day to the target month's length.
pub fn checked_shift_months(
  date: NaiveDate,
  months: i32
) -> Option<NaiveDate> {
  let step =
    Months::new(months.unsigned_abs());
  if months < 0 {
    date.checked_sub_months(step)
  } else {
    date.checked_add_months(step)
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    Weekday
  };

  use super::*;

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn parses_relative_and_named_dates()
  {
    let today = date(2026, 2, 17);
    assert_eq!(
      parse_date_arg("today", today)
        .expect("today"),
      today
    );
    assert_eq!(
      parse_date_arg("+3d", today)
        .expect("relative days"),
      date(2026, 2, 20)
    );
    assert_eq!(
      parse_date_arg("-1w", today)
        .expect("relative weeks"),
      date(2026, 2, 10)
    );
    assert_eq!(
      parse_date_arg(
        "wednesday",
        today
      )
      .expect("weekday"),
      date(2026, 2, 18)
    );
    assert_eq!(
      parse_date_arg(
        "2025-06-15",
        today
      )
      .expect("iso date"),
      date(2025, 6, 15)
    );
    assert!(
      parse_date_arg("soonish", today)
        .is_err()
    );
  }

  #[test]
  fn oversized_relative_dates_are_errors()
  {
    let today = date(2025, 6, 1);
    for input in [
      "+99999999999999999d",
      "-99999999999999999w",
      "+9999999999m",
      "+99999999y",
      "-3000000y"
    ] {
      assert!(
        parse_date_arg(input, today)
          .is_err(),
        "{input} should be rejected"
      );
    }
    assert_eq!(
      add_days(today, i64::MAX),
      today
    );
    assert_eq!(
      shift_months(today, i32::MIN),
      today
    );
    assert_eq!(
      shift_years(
        date(2024, 2, 29),
        1
      ),
      date(2025, 2, 28)
    );
  }

  #[test]
  fn month_shift_clamps_day() {
    assert_eq!(
      shift_months(
        date(2025, 1, 31),
        1
      ),
      date(2025, 2, 28)
    );
    assert_eq!(
      shift_months(
        date(2025, 1, 15),
        -1
      ),
      date(2024, 12, 15)
    );
    assert_eq!(
      shift_years(
        date(2024, 2, 29),
        1
      ),
      date(2025, 2, 28)
    );
  }

  #[test]
  fn week_starts_on_sunday() {
    // 2025-06-18 is a Wednesday.
    assert_eq!(
      start_of_week(
        date(2025, 6, 18),
        Weekday::Sun
      ),
      date(2025, 6, 15)
    );
    assert_eq!(
      start_of_week(
        date(2025, 6, 15),
        Weekday::Sun
      ),
      date(2025, 6, 15)
    );
  }

  #[test]
  fn names_follow_calendar() {
    assert_eq!(
      weekday_name(date(2025, 6, 15)),
      "Sunday"
    );
    assert_eq!(month_name(6), "June");
    assert_eq!(
      days_in_month(2024, 2),
      29
    );
  }
}
