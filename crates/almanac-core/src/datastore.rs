use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{NaiveDate, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::app::Calendar;
use crate::category::CategoryRegistry;
use crate::event::{Category, Event, Id, Priority};
use crate::filter::SortMode;
use crate::layout::LayoutState;
use crate::query::QueryHistory;
use crate::store::EventStore;
use crate::view::{ViewKind, YearMode};

pub const SNAPSHOT_FILE: &str = "calendar_app_data.json";
pub const BACKUP_FILE: &str = "calendar_backup.json";
pub const QUARANTINE_SUFFIX: &str = "corrupt";

/// The persisted JSON document. Every field is optional so that partial
/// files only override what they carry. Records and sections are read one
/// at a time: a malformed event or category is dropped on its own and a
/// malformed section counts as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_records"
    )]
    pub events: Option<Vec<Event>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_records"
    )]
    pub categories: Option<Vec<Category>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_section"
    )]
    pub app_state: Option<AppStateDoc>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_section"
    )]
    pub layout_state: Option<LayoutState>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_section"
    )]
    pub saved_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateDoc {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_section"
    )]
    pub view: Option<ViewKind>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_section"
    )]
    pub current_date: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_section"
    )]
    pub year_mode: Option<YearMode>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_records"
    )]
    pub active_categories: Option<Vec<Id>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_section"
    )]
    pub active_priorities: Option<Vec<Priority>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_section"
    )]
    pub sort_by: Option<SortMode>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_section"
    )]
    pub query_history: Option<Vec<String>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_section"
    )]
    pub filter_panel_open: Option<bool>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Document {
    pub fn capture(calendar: &Calendar) -> Self {
        let settings = &calendar.settings;
        Self {
            events: Some(calendar.events.as_slice().to_vec()),
            categories: Some(calendar.categories.iter().cloned().collect()),
            app_state: Some(AppStateDoc {
                view: Some(settings.view),
                current_date: Some(settings.reference.format("%Y-%m-%d").to_string()),
                year_mode: Some(settings.year_mode),
                active_categories: Some(calendar.filters.active_categories.iter().cloned().collect()),
                active_priorities: Some(calendar.filters.active_priorities.iter().copied().collect()),
                sort_by: Some(settings.sort_by),
                query_history: Some(calendar.history.entries().to_vec()),
                filter_panel_open: Some(settings.filter_panel_open),
                extra: calendar.extra.clone(),
            }),
            layout_state: Some(calendar.layout.clone()),
            saved_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }

    /// Overrides every part of `calendar` this document carries.
    pub fn apply(self, calendar: &mut Calendar, history_limit: usize) {
        if let Some(events) = self.events {
            calendar.events = EventStore::new(events);
        }
        if let Some(categories) = self.categories {
            calendar.categories = CategoryRegistry::from(categories);
        }
        if let Some(layout) = self.layout_state {
            calendar.layout = layout;
        }
        if let Some(state) = self.app_state {
            apply_app_state(state, calendar);
        }
        calendar.layout.normalize();
        calendar.history.normalize(history_limit);
    }
}

fn apply_app_state(state: AppStateDoc, calendar: &mut Calendar) {
    let settings = &mut calendar.settings;
    if let Some(view) = state.view {
        settings.view = view;
    }
    if let Some(mode) = state.year_mode {
        settings.year_mode = mode;
    }
    if let Some(sort_by) = state.sort_by {
        settings.sort_by = sort_by;
    }
    if let Some(open) = state.filter_panel_open {
        settings.filter_panel_open = open;
    }
    if let Some(reference) = state.current_date.as_deref().and_then(parse_stored_date) {
        settings.reference = reference;
    }
    if let Some(active) = state.active_categories {
        calendar.filters.active_categories = active.into_iter().collect();
    }
    if let Some(active) = state.active_priorities {
        calendar.filters.active_priorities = active.into_iter().collect();
    }
    if let Some(history) = state.query_history {
        calendar.history = QueryHistory::new(history);
    }
    calendar.extra = state.extra;
}

/// Accepts `YYYY-MM-DD` as well as full ISO-8601 timestamps.
fn parse_stored_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub snapshot_path: PathBuf,
    pub backup_path: PathBuf,
    /// Set when an unreadable snapshot could not be moved aside; saving
    /// would destroy it.
    snapshot_locked: Cell<bool>,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let snapshot_path = data_dir.join(SNAPSHOT_FILE);
        let backup_path = data_dir.join(BACKUP_FILE);
        info!(
            data_dir = %data_dir.display(),
            snapshot = %snapshot_path.display(),
            backup = %backup_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            snapshot_path,
            backup_path,
            snapshot_locked: Cell::new(false),
        })
    }

    /// Reads the snapshot, falling back to the backup. Unreadable files are
    /// logged and skipped; `None` means neither was usable. An unreadable
    /// snapshot is first moved aside (see [`DataStore::quarantine_path`]) so
    /// the next save cannot overwrite it.
    #[tracing::instrument(skip(self))]
    pub fn load(&self) -> Option<Document> {
        for path in [&self.snapshot_path, &self.backup_path] {
            if !path.exists() {
                debug!(file = %path.display(), "no document");
                continue;
            }
            match read_document(path) {
                Ok(doc) => {
                    debug!(file = %path.display(), "loaded document");
                    return Some(doc);
                }
                Err(err) => {
                    warn!(file = %path.display(), error = %format!("{err:#}"), "ignoring unreadable document");
                    if path == &self.snapshot_path {
                        self.quarantine_snapshot();
                    }
                }
            }
        }
        None
    }

    /// Where an unreadable snapshot is moved:
    /// `calendar_app_data.json.corrupt`, or a timestamped variant when that
    /// name is already taken.
    pub fn quarantine_path(&self) -> PathBuf {
        let plain = self.data_dir.join(format!("{SNAPSHOT_FILE}.{QUARANTINE_SUFFIX}"));
        if !plain.exists() {
            return plain;
        }
        self.data_dir.join(format!(
            "{SNAPSHOT_FILE}.{QUARANTINE_SUFFIX}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%3f")
        ))
    }

    fn quarantine_snapshot(&self) {
        let target = self.quarantine_path();
        match fs::rename(&self.snapshot_path, &target) {
            Ok(()) => warn!(
                from = %self.snapshot_path.display(),
                to = %target.display(),
                "moved unreadable snapshot aside"
            ),
            Err(err) => {
                warn!(
                    file = %self.snapshot_path.display(),
                    error = %err,
                    "could not move unreadable snapshot; saving is disabled"
                );
                self.snapshot_locked.set(true);
            }
        }
    }

    pub fn load_calendar(&self, today: NaiveDate, history_limit: usize) -> Calendar {
        let mut calendar = Calendar::new(today);
        if let Some(doc) = self.load() {
            doc.apply(&mut calendar, history_limit);
        }
        calendar
    }

    #[tracing::instrument(skip(self, calendar), fields(events = calendar.events.len()))]
    pub fn save(&self, calendar: &Calendar) -> anyhow::Result<()> {
        if self.snapshot_locked.get() {
            return Err(anyhow!(
                "refusing to overwrite unreadable snapshot {}",
                self.snapshot_path.display()
            ));
        }
        let doc = Document::capture(calendar);
        let payload = serde_json::to_string(&doc).context("failed to serialize snapshot")?;
        write_atomic(&self.snapshot_path, payload.as_bytes())
            .with_context(|| format!("failed to save {}", self.snapshot_path.display()))
    }

    /// Writes a pretty-printed copy, to the backup file unless `path` is given.
    #[tracing::instrument(skip(self, calendar))]
    pub fn export(&self, calendar: &Calendar, path: Option<&Path>) -> anyhow::Result<PathBuf> {
        let target = path.map(Path::to_path_buf).unwrap_or_else(|| self.backup_path.clone());
        let doc = Document::capture(calendar);
        let payload = serde_json::to_string_pretty(&doc).context("failed to serialize export")?;
        write_atomic(&target, payload.as_bytes())
            .with_context(|| format!("failed to export {}", target.display()))?;
        info!(file = %target.display(), "exported calendar");
        Ok(target)
    }

    #[tracing::instrument(skip(self))]
    pub fn import(&self, path: &Path) -> anyhow::Result<Document> {
        let doc = read_document(path)
            .with_context(|| format!("failed to import {}", path.display()))?;
        info!(file = %path.display(), "imported document");
        Ok(doc)
    }
}

/// A section that fails to parse is logged and treated as absent.
fn lenient_section<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Some(raw) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match serde_json::from_value(raw) {
        Ok(section) => Ok(Some(section)),
        Err(err) => {
            warn!(section = std::any::type_name::<T>(), error = %err, "ignoring unreadable section");
            Ok(None)
        }
    }
}

/// Parses each array element on its own and drops the ones that fail.
fn lenient_records<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = match Option::<Value>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(Value::Array(items)) => items,
        Some(other) => {
            warn!(found = %other, "expected an array of records; ignoring");
            return Ok(None);
        }
    };

    let records = raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(
                    record = std::any::type_name::<T>(),
                    index,
                    error = %err,
                    "dropping unreadable record"
                );
                None
            }
        })
        .collect();
    Ok(Some(records))
}

fn read_document(path: &Path) -> anyhow::Result<Document> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed parsing {}", path.display()))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    debug!(file = %path.display(), bytes = bytes.len(), "writing atomically");
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventDraft;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).expect("valid date")
    }

    #[test]
    fn legacy_document_applies_with_coercions() {
        let raw = r##"{
            "events": [
                {"id": 1718000000000, "name": "Launch", "date": "2025-06-15",
                 "categoryId": 42, "priority": "HIGH", "description": ""},
                {"id": "x", "name": "Loose", "date": "2025-06-16", "priority": "urgent"}
            ],
            "categories": [{"id": 42, "name": "Work", "color": "#3b82f6"}],
            "appState": {
                "view": "sql",
                "currentDate": "2025-06-15T03:00:00.000Z",
                "activeCategories": ["default", 42],
                "activePriorities": ["high", "low"],
                "sortBy": "date_asc",
                "darkMode": true
            },
            "layoutState": {"colWidths": ["90px"], "statsWidth": "200px", "rowHeights": {}}
        }"##;
        let doc: Document = serde_json::from_str(raw).expect("document");
        let mut calendar = Calendar::new(day(1));
        doc.apply(&mut calendar, 20);

        assert_eq!(calendar.events.len(), 2);
        let launch = calendar.events.get(&Id::from("1718000000000")).expect("numeric id");
        assert_eq!(launch.priority, Priority::High);
        assert_eq!(launch.category_id, Id::from("42"));
        let loose = calendar.events.get(&Id::from("x")).expect("string id");
        assert_eq!(loose.priority, Priority::Low);
        assert!(loose.category_id.is_default_category());

        assert_eq!(calendar.categories.len(), 2);
        assert_eq!(calendar.settings.view, ViewKind::Month);
        assert_eq!(calendar.settings.reference, day(15));
        assert_eq!(calendar.settings.sort_by, SortMode::DateAsc);
        assert!(calendar.filters.active_categories.contains(&Id::from("42")));
        assert_eq!(calendar.layout.col_widths.len(), 7);
        assert_eq!(calendar.layout.stats_width, "200px");
        assert_eq!(calendar.extra.get("darkMode"), Some(&Value::Bool(true)));
        assert_eq!(calendar.visible_events().len(), 2);
    }

    #[test]
    fn absent_fields_leave_state_untouched() {
        let mut calendar = Calendar::new(day(1));
        calendar.add_event(EventDraft::new("Keep", day(3)));
        let doc: Document = serde_json::from_str(r#"{"layoutState": {"statsWidth": "240px"}}"#)
            .expect("document");
        doc.apply(&mut calendar, 20);
        assert_eq!(calendar.events.len(), 1);
        assert_eq!(calendar.layout.stats_width, "240px");
        assert_eq!(calendar.layout.col_widths.len(), 7);
    }

    #[test]
    fn save_then_load_restores_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open");
        assert!(store.load().is_none());

        let mut calendar = Calendar::new(day(1));
        calendar.add_event(EventDraft::new("Standup", day(2)));
        calendar.settings.view = ViewKind::Year;
        calendar.settings.year_mode = YearMode::Grid;
        calendar.history.record("SELECT 1", 20);
        store.save(&calendar).expect("save");

        let loaded = store.load_calendar(day(30), 20);
        assert_eq!(loaded.events.as_slice(), calendar.events.as_slice());
        assert_eq!(loaded.settings, calendar.settings);
        assert_eq!(loaded.filters, calendar.filters);
        assert_eq!(loaded.history.entries(), &["SELECT 1".to_string()]);
    }

    #[test]
    fn corrupt_snapshot_falls_back_to_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open");

        let mut calendar = Calendar::new(day(1));
        calendar.add_event(EventDraft::new("Backed up", day(9)));
        let exported = store.export(&calendar, None).expect("export");
        assert_eq!(exported, store.backup_path);
        fs::write(&store.snapshot_path, "{not json").expect("corrupt");

        let quarantine = store.quarantine_path();
        let loaded = store.load_calendar(day(1), 20);
        assert_eq!(loaded.events.len(), 1);
        assert!(!store.snapshot_path.exists());
        assert_eq!(fs::read_to_string(&quarantine).expect("moved aside"), "{not json");
        assert!(store.import(&quarantine).is_err());
    }

    #[test]
    fn malformed_records_are_dropped_one_by_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open");
        let raw = r##"{
            "events": [
                {"id": "1", "name": "Keep me", "date": "2025-06-15", "categoryId": "default",
                 "priority": "high", "description": null},
                {"id": "2", "name": "No date", "date": "", "categoryId": "default"},
                {"name": "No id", "date": "2025-06-16"},
                {"id": "3", "name": null, "date": "2025-06-17", "categoryId": null}
            ],
            "categories": [{"id": "w", "name": "Work", "color": "#3b82f6"}, "garbage"],
            "appState": {"currentDate": 20250615, "sortBy": "name_asc", "activeCategories": ["default", null, "w"]},
            "layoutState": "not an object"
        }"##;
        fs::write(&store.snapshot_path, raw).expect("write snapshot");

        let mut calendar = store.load_calendar(day(1), 20);
        assert_eq!(calendar.events.len(), 2);
        let kept = calendar.events.get(&Id::from("1")).expect("valid event kept");
        assert_eq!(kept.description, "");
        assert!(calendar.events.get(&Id::from("3")).expect("null name kept").category_id.is_default_category());
        assert!(calendar.categories.get(&Id::from("w")).is_some());
        assert_eq!(calendar.settings.reference, day(1));
        assert_eq!(calendar.settings.sort_by, SortMode::NameAsc);
        assert_eq!(calendar.filters.active_categories.len(), 2);
        assert_eq!(calendar.layout.col_widths.len(), 7);

        calendar.add_event(EventDraft::new("New", day(20)));
        store.save(&calendar).expect("save");
        let saved = fs::read_to_string(&store.snapshot_path).expect("snapshot");
        assert!(saved.contains("Keep me"));
        assert_eq!(store.load_calendar(day(1), 20).events.len(), 3);
    }

    #[test]
    fn unreadable_snapshot_survives_the_next_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open");
        let original = r#"{"events": [{"id": "1", "name": "Keep me", "date": "2025-06-15"}"#;
        fs::write(&store.snapshot_path, original).expect("truncated snapshot");

        let quarantine = store.quarantine_path();
        let mut calendar = store.load_calendar(day(1), 20);
        assert!(calendar.events.is_empty());
        calendar.add_event(EventDraft::new("After", day(2)));
        store.save(&calendar).expect("save");

        assert_eq!(fs::read_to_string(&quarantine).expect("quarantined"), original);
        fs::write(&store.snapshot_path, "{").expect("corrupt again");
        assert!(store.load().is_none());
        let quarantined = fs::read_dir(dir.path())
            .expect("list data dir")
            .filter_map(Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("calendar_app_data.json.corrupt")
            })
            .count();
        assert_eq!(quarantined, 2);
        assert_eq!(fs::read_to_string(&quarantine).expect("first copy kept"), original);
    }
}
