use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::category::CategoryRegistry;
use crate::datetime;
use crate::event::{Category, Event, EventDraft, Id};
use crate::filter::{FilterState, SortMode, visible_events};
use crate::layout::LayoutState;
use crate::query::QueryHistory;
use crate::store::EventStore;
use crate::tables::QueryTables;
use crate::view::{Projection, ViewKind, ViewRequest, YearMode, project, shift_reference};

/// What the user is looking at. Persisted alongside the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSettings {
    pub view: ViewKind,
    pub year_mode: YearMode,
    pub reference: NaiveDate,
    pub sort_by: SortMode,
    pub filter_panel_open: bool,
}

impl ViewSettings {
    pub fn new(reference: NaiveDate) -> Self {
        Self {
            view: ViewKind::default(),
            year_mode: YearMode::default(),
            reference,
            sort_by: SortMode::default(),
            filter_panel_open: false,
        }
    }

    pub fn request(&self) -> ViewRequest {
        ViewRequest {
            view: self.view,
            reference: self.reference,
            year_mode: self.year_mode,
        }
    }
}

/// What happens to the events of a category being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Reassign them to the default category.
    Move,
    Delete,
}

impl FromStr for Disposition {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "move" | "m" => Ok(Disposition::Move),
            "delete" | "d" => Ok(Disposition::Delete),
            other => Err(anyhow!("expected move or delete, got {other}")),
        }
    }
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Move => "move",
            Disposition::Delete => "delete",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum DeleteFlow {
    #[default]
    Idle,
    Pending(Id),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryDeleteOutcome {
    pub category: Category,
    pub disposition: &'static str,
    pub events_moved: usize,
    pub events_deleted: usize,
}

/// The whole in-memory state of one calendar. Commands mutate it through
/// these methods and the caller persists it afterwards.
#[derive(Debug, Clone)]
pub struct Calendar {
    pub events: EventStore,
    pub categories: CategoryRegistry,
    pub filters: FilterState,
    pub settings: ViewSettings,
    pub layout: LayoutState,
    pub history: QueryHistory,
    /// Unknown `appState` keys, written back untouched.
    pub extra: BTreeMap<String, Value>,
    delete_flow: DeleteFlow,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::new(datetime::today())
    }
}

impl Calendar {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            events: EventStore::default(),
            categories: CategoryRegistry::default(),
            filters: FilterState::default(),
            settings: ViewSettings::new(today),
            layout: LayoutState::default(),
            history: QueryHistory::default(),
            extra: BTreeMap::new(),
            delete_flow: DeleteFlow::Idle,
        }
    }

    pub fn visible_events(&self) -> Vec<&Event> {
        visible_events(
            self.events.as_slice(),
            &self.categories,
            &self.filters,
            self.settings.sort_by,
        )
    }

    pub fn project(&self) -> Projection<'_> {
        let visible = self.visible_events();
        project(&visible, &self.categories, self.settings.request())
    }

    pub fn query_tables(&self, today: NaiveDate) -> QueryTables {
        QueryTables::build(self.events.as_slice(), &self.categories, today)
    }

    /// Moves one screen forward or back in the current view.
    pub fn shift(&mut self, step: i32) -> NaiveDate {
        self.settings.reference = shift_reference(self.settings.view, self.settings.reference, step);
        self.settings.reference
    }

    pub fn add_event(&mut self, draft: EventDraft) -> &Event {
        self.events.create(draft)
    }

    /// Creates a category and makes it visible right away.
    #[instrument(skip(self))]
    pub fn add_category(&mut self, name: &str, color: &str) -> anyhow::Result<Id> {
        let name = name.trim();
        if name.is_empty() {
            bail!("category name must not be empty");
        }
        let id = self.categories.create(name, color.trim());
        self.filters.activate_category(&id);
        info!(id = %id, "created category");
        Ok(id)
    }

    #[instrument(skip(self))]
    pub fn edit_category(
        &mut self,
        id: &Id,
        name: Option<&str>,
        color: Option<&str>,
    ) -> anyhow::Result<&Category> {
        let mut category = self
            .categories
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("category not found: {id}"))?;
        if let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) {
            category.name = name.to_string();
        }
        if let Some(color) = color.map(str::trim).filter(|color| !color.is_empty()) {
            category.color = color.to_string();
        }
        self.categories.upsert(category);
        self.categories
            .get(id)
            .ok_or_else(|| anyhow!("category not found: {id}"))
    }

    pub fn pending_category_delete(&self) -> Option<&Id> {
        match &self.delete_flow {
            DeleteFlow::Idle => None,
            DeleteFlow::Pending(id) => Some(id),
        }
    }

    /// First step of deleting a category. A newer prompt replaces an older
    /// pending one.
    #[instrument(skip(self))]
    pub fn prompt_category_delete(&mut self, id: &Id) -> anyhow::Result<()> {
        if id.is_default_category() {
            bail!("the default category cannot be deleted");
        }
        if self.categories.get(id).is_none() {
            bail!("category not found: {id}");
        }
        self.delete_flow = DeleteFlow::Pending(id.clone());
        Ok(())
    }

    /// Second step. Returns `None` without touching anything when no delete
    /// is pending.
    #[instrument(skip(self))]
    pub fn confirm_category_delete(
        &mut self,
        disposition: Disposition,
    ) -> anyhow::Result<Option<CategoryDeleteOutcome>> {
        let DeleteFlow::Pending(id) = std::mem::take(&mut self.delete_flow) else {
            return Ok(None);
        };

        let (events_moved, events_deleted) = match disposition {
            Disposition::Move => (
                self.events.reassign_category(&id, &Id::default_category()),
                0,
            ),
            Disposition::Delete => (0, self.events.remove_category_events(&id)),
        };
        let category = self
            .categories
            .remove(&id)?
            .ok_or_else(|| anyhow!("category not found: {id}"))?;
        self.filters.forget_category(&id);

        info!(
            id = %id,
            events_moved,
            events_deleted,
            "deleted category"
        );
        Ok(Some(CategoryDeleteOutcome {
            category,
            disposition: disposition.as_str(),
            events_moved,
            events_deleted,
        }))
    }

    /// Returns `true` when a pending delete was dropped.
    pub fn cancel_category_delete(&mut self) -> bool {
        matches!(
            std::mem::take(&mut self.delete_flow),
            DeleteFlow::Pending(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Priority;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).expect("valid date")
    }

    fn calendar_with_work() -> (Calendar, Id) {
        let mut calendar = Calendar::new(day(1));
        let work = calendar.add_category("Work", "#3b82f6").expect("category");
        for (n, category) in [&work, &work, &Id::default_category()].into_iter().enumerate() {
            let mut draft = EventDraft::new(format!("event {n}"), day(n as u32 + 1));
            draft.category_id = category.clone();
            calendar.add_event(draft);
        }
        (calendar, work)
    }

    #[test]
    fn new_category_is_active() {
        let (calendar, work) = calendar_with_work();
        assert!(calendar.filters.active_categories.contains(&work));
        assert_eq!(calendar.visible_events().len(), 3);
    }

    #[test]
    fn delete_with_move_reassigns_to_default() {
        let (mut calendar, work) = calendar_with_work();
        calendar.prompt_category_delete(&work).expect("prompt");
        assert_eq!(calendar.pending_category_delete(), Some(&work));

        let outcome = calendar
            .confirm_category_delete(Disposition::Move)
            .expect("confirm")
            .expect("was pending");
        assert_eq!(outcome.events_moved, 2);
        assert_eq!(calendar.events.len(), 3);
        assert!(calendar.events.iter().all(|e| e.category_id.is_default_category()));
        assert!(calendar.categories.get(&work).is_none());
        assert!(!calendar.filters.active_categories.contains(&work));
        assert_eq!(calendar.pending_category_delete(), None);
    }

    #[test]
    fn delete_with_delete_drops_events() {
        let (mut calendar, work) = calendar_with_work();
        calendar.prompt_category_delete(&work).expect("prompt");
        let outcome = calendar
            .confirm_category_delete(Disposition::Delete)
            .expect("confirm")
            .expect("was pending");
        assert_eq!(outcome.events_deleted, 2);
        assert_eq!(calendar.events.len(), 1);
        assert!(calendar.events.iter().all(|e| e.category_id != work));
    }

    #[test]
    fn confirm_without_prompt_is_a_no_op() {
        let (mut calendar, work) = calendar_with_work();
        assert_eq!(
            calendar.confirm_category_delete(Disposition::Delete).expect("confirm"),
            None
        );
        assert_eq!(calendar.events.len(), 3);

        calendar.prompt_category_delete(&work).expect("prompt");
        assert!(calendar.cancel_category_delete());
        assert!(!calendar.cancel_category_delete());
        assert!(calendar.categories.get(&work).is_some());
    }

    #[test]
    fn default_category_cannot_be_prompted() {
        let (mut calendar, _) = calendar_with_work();
        assert!(calendar.prompt_category_delete(&Id::default_category()).is_err());
        assert!(calendar.prompt_category_delete(&Id::from("nope")).is_err());
        assert_eq!(calendar.pending_category_delete(), None);
    }

    #[test]
    fn edit_category_keeps_blank_fields() {
        let (mut calendar, work) = calendar_with_work();
        let edited = calendar
            .edit_category(&work, Some("Office"), Some(" "))
            .expect("edit");
        assert_eq!(edited.name, "Office");
        assert_eq!(edited.color, "#3b82f6");
    }

    #[test]
    fn priority_filter_hides_without_deleting() {
        let mut calendar = Calendar::new(day(1));
        let mut draft = EventDraft::new("Launch", day(15));
        draft.priority = Priority::High;
        calendar.add_event(draft);

        assert_eq!(calendar.visible_events().len(), 1);
        calendar.filters.toggle_priority(Priority::High);
        assert!(calendar.visible_events().is_empty());
        assert_eq!(calendar.events.len(), 1);
    }

    #[test]
    fn shift_follows_view() {
        let mut calendar = Calendar::new(day(30));
        calendar.settings.view = ViewKind::Week;
        assert_eq!(calendar.shift(1), NaiveDate::from_ymd_opt(2025, 7, 7).expect("date"));
        calendar.settings.view = ViewKind::Month;
        assert_eq!(calendar.shift(-1), day(7));
    }
}
