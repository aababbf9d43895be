use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_TRACK: &str = "minmax(100px, 1fr)";
pub const DEFAULT_STATS_WIDTH: &str = "160px";
pub const MIN_COLUMN_PX: f64 = 80.0;
pub const MIN_ROW_PX: f64 = 100.0;
const FALLBACK_START_PX: f64 = 100.0;
const WEEKDAY_COLUMNS: usize = 7;

/// Identifies one week row of the month grid by the date it starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "String")]
pub struct RowKey(NaiveDate);

impl RowKey {
    pub fn new(week_start: NaiveDate) -> Self {
        Self(week_start)
    }

    pub fn week_start(self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row-{}", self.0.format("%Y-%m-%d"))
    }
}

impl From<RowKey> for String {
    fn from(key: RowKey) -> Self {
        key.to_string()
    }
}

impl FromStr for RowKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("row-").unwrap_or(s);
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(RowKey)
            .map_err(|err| anyhow!("invalid row key {s}: {err}"))
    }
}

/// User-adjusted grid sizes. Values are CSS-like size tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutState {
    #[serde(default = "default_col_widths")]
    pub col_widths: Vec<String>,

    #[serde(default = "default_stats_width")]
    pub stats_width: String,

    #[serde(default)]
    pub row_heights: BTreeMap<String, String>,
}

impl Default for LayoutState {
    fn default() -> Self {
        Self {
            col_widths: default_col_widths(),
            stats_width: default_stats_width(),
            row_heights: BTreeMap::new(),
        }
    }
}

fn default_col_widths() -> Vec<String> {
    vec![DEFAULT_TRACK.to_string(); WEEKDAY_COLUMNS]
}

fn default_stats_width() -> String {
    DEFAULT_STATS_WIDTH.to_string()
}

impl LayoutState {
    /// Restores the seven-column invariant after loading foreign data.
    pub fn normalize(&mut self) {
        if self.col_widths.len() != WEEKDAY_COLUMNS {
            warn!(
                found = self.col_widths.len(),
                "column widths malformed; resetting to defaults"
            );
            self.col_widths = default_col_widths();
        }
    }

    pub fn reset(&mut self) {
        info!("layout reset to defaults");
        *self = Self::default();
    }

    pub fn column_template(&self) -> String {
        self.col_widths
            .iter()
            .chain(std::iter::once(&self.stats_width))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn row_template(&self, rows: &[RowKey]) -> String {
        let mut parts = vec!["auto".to_string()];
        parts.extend(rows.iter().map(|key| self.row_height(*key).to_string()));
        parts.join(" ")
    }

    pub fn row_height(&self, key: RowKey) -> &str {
        self.row_heights
            .get(&key.to_string())
            .map(String::as_str)
            .unwrap_or(DEFAULT_TRACK)
    }

    pub fn col_width(&self, index: usize) -> anyhow::Result<&str> {
        self.col_widths
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("column index out of range: {index} (0-6)"))
    }

    fn set_col_px(&mut self, index: usize, px: f64) {
        if let Some(slot) = self.col_widths.get_mut(index) {
            *slot = format_px(px.max(MIN_COLUMN_PX));
        }
    }

    fn set_row_px(&mut self, key: RowKey, px: f64) {
        self.row_heights
            .insert(key.to_string(), format_px(px.max(MIN_ROW_PX)));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeTarget {
    Column(usize),
    Row(RowKey),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ActiveResize {
    target: ResizeTarget,
    start_pointer: f64,
    start_px: f64,
}

/// Exclusive resize mode: at most one gesture runs at a time, and state is
/// only persisted once it finishes.
#[derive(Debug, Clone, Default)]
pub struct Resizer {
    active: Option<ActiveResize>,
}

impl Resizer {
    #[instrument(skip(self, layout))]
    pub fn begin(
        &mut self,
        layout: &LayoutState,
        target: ResizeTarget,
        start_pointer: f64,
    ) -> anyhow::Result<()> {
        if self.active.is_some() {
            return Err(anyhow!("a resize is already in progress"));
        }
        let start_token = match target {
            ResizeTarget::Column(index) => layout.col_width(index)?,
            ResizeTarget::Row(key) => layout.row_height(key),
        };
        let start_px = parse_px(start_token).unwrap_or(FALLBACK_START_PX);
        debug!(start_px, "resize started");
        self.active = Some(ActiveResize {
            target,
            start_pointer,
            start_px,
        });
        Ok(())
    }

    /// Applies the pointer position to the layout. No-op outside a gesture.
    pub fn drag(&self, layout: &mut LayoutState, pointer: f64) {
        let Some(active) = self.active else {
            return;
        };
        let size = active.start_px + (pointer - active.start_pointer);
        match active.target {
            ResizeTarget::Column(index) => layout.set_col_px(index, size),
            ResizeTarget::Row(key) => layout.set_row_px(key, size),
        }
    }

    /// Ends the gesture. Returns `true` when one was running, meaning the
    /// layout changed and must be persisted.
    pub fn finish(&mut self) -> bool {
        self.active.take().is_some()
    }
}

/// Leading number of a size token: `"120px"` is 120,
/// `"minmax(100px, 1fr)"` has none.
pub fn parse_px(token: &str) -> Option<f64> {
    let re = Regex::new(r"^\s*([+-]?(?:\d+\.?\d*|\.\d+))").ok()?;
    re.captures(token)?.get(1)?.as_str().parse().ok()
}

fn format_px(px: f64) -> String {
    if px.fract() == 0.0 {
        format!("{}px", px as i64)
    } else {
        format!("{px}px")
    }
}
