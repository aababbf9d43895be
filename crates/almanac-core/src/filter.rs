use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{
  Deserialize,
  Serialize
};
use tracing::trace;

use crate::category::CategoryRegistry;
use crate::event::{
  Event,
  Id,
  Priority
};

/// Which events are visible. Hidden
/// events stay in the store.
#[derive(
  Debug, Clone, PartialEq, Eq,
)]
pub struct FilterState {
  pub active_categories:
    BTreeSet<Id>,
  pub active_priorities:
    BTreeSet<Priority>
}

impl Default for FilterState {
  fn default() -> Self {
    Self {
      active_categories: BTreeSet::from(
        [Id::default_category()]
      ),
      active_priorities:
        BTreeSet::from(Priority::ALL)
    }
  }
}

impl FilterState {
  pub fn allows(
    &self,
    event: &Event
  ) -> bool {
    self
      .active_categories
      .contains(&event.category_id)
      && self
        .active_priorities
        .contains(&event.priority)
  }

  /// Flips membership of a category;
  /// returns whether it is now active.
  pub fn toggle_category(
    &mut self,
    id: &Id
  ) -> bool {
    if self.active_categories.remove(id)
    {
      false
    } else {
      self
        .active_categories
        .insert(id.clone());
      true
    }
  }

  /// Clears the set when every category
  /// is active, otherwise activates all.
  pub fn toggle_all_categories(
    &mut self,
    categories: &CategoryRegistry
  ) {
    if self.active_categories.len()
      == categories.len()
    {
      self.active_categories.clear();
    } else {
      self.active_categories =
        categories
          .ids()
          .cloned()
          .collect();
    }
  }

  pub fn toggle_priority(
    &mut self,
    priority: Priority
  ) -> bool {
    if self
      .active_priorities
      .remove(&priority)
    {
      false
    } else {
      self
        .active_priorities
        .insert(priority);
      true
    }
  }

  pub fn activate_category(
    &mut self,
    id: &Id
  ) {
    self
      .active_categories
      .insert(id.clone());
  }

  pub fn forget_category(
    &mut self,
    id: &Id
  ) {
    self.active_categories.remove(id);
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
  rename_all = "snake_case",
  from = "String"
)]
pub enum SortMode {
  CategoryAsc,
  #[default]
  PriorityDesc,
  PriorityAsc,
  DateAsc,
  DateDesc,
  NameAsc,
  /// Any key we do not know. Leaves
  /// the order untouched.
  Unsorted
}

impl SortMode {
  pub const ALL: [SortMode; 6] = [
    SortMode::CategoryAsc,
    SortMode::PriorityDesc,
    SortMode::PriorityAsc,
    SortMode::DateAsc,
    SortMode::DateDesc,
    SortMode::NameAsc
  ];

  pub fn as_key(self) -> &'static str {
    match self {
      | SortMode::CategoryAsc => {
        "category_asc"
      }
      | SortMode::PriorityDesc => {
        "priority_desc"
      }
      | SortMode::PriorityAsc => {
        "priority_asc"
      }
      | SortMode::DateAsc => "date_asc",
      | SortMode::DateDesc => {
        "date_desc"
      }
      | SortMode::NameAsc => "name_asc",
      | SortMode::Unsorted => "unsorted"
    }
  }

  fn from_key(
    key: &str
  ) -> Option<Self> {
    Self::ALL
      .into_iter()
      .find(|mode| mode.as_key() == key)
  }
}

impl From<String> for SortMode {
  fn from(raw: String) -> Self {
    Self::from_key(raw.trim())
      .unwrap_or(SortMode::Unsorted)
  }
}

impl FromStr for SortMode {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    Self::from_key(
      s.trim()
        .to_ascii_lowercase()
        .as_str()
    )
    .ok_or_else(|| {
      anyhow!(
        "unknown sort mode: {s} \
         (expected one of: {})",
        Self::ALL
          .iter()
          .map(|mode| mode.as_key())
          .collect::<Vec<_>>()
          .join(", ")
      )
    })
  }
}

impl fmt::Display for SortMode {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_key())
  }
}

/// Filters then stably sorts events for
/// display.
#[tracing::instrument(skip(
  events, categories, filters
))]
pub fn visible_events<'a>(
  events: &'a [Event],
  categories: &CategoryRegistry,
  filters: &FilterState,
  sort_by: SortMode
) -> Vec<&'a Event> {
  let mut out: Vec<&Event> = events
    .iter()
    .filter(|event| filters.allows(event))
    .collect();
  sort_events(
    &mut out, categories, sort_by
  );
  trace!(
    total = events.len(),
    visible = out.len(),
    "filtered events"
  );
  out
}

pub fn sort_events(
  events: &mut Vec<&Event>,
  categories: &CategoryRegistry,
  sort_by: SortMode
) {
  if sort_by == SortMode::Unsorted {
    return;
  }

  let mut keyed: Vec<(String, &Event)> =
    events
      .iter()
      .map(|event| {
        (
          categories
            .resolve(&event.category_id)
            .name
            .to_lowercase(),
          *event
        )
      })
      .collect();

  keyed.sort_by(|(cat_a, a), (cat_b, b)| {
    compare_events(
      a, cat_a, b, cat_b, sort_by
    )
  });

  *events = keyed
    .into_iter()
    .map(|(_, event)| event)
    .collect();
}

fn compare_events(
  a: &Event,
  cat_a: &str,
  b: &Event,
  cat_b: &str,
  sort_by: SortMode
) -> Ordering {
  let prio_a = a.priority.rank();
  let prio_b = b.priority.rank();

  match sort_by {
    | SortMode::CategoryAsc => {
      locale_cmp(cat_a, cat_b)
        .then(prio_b.cmp(&prio_a))
    }
    | SortMode::PriorityDesc => {
      prio_b
        .cmp(&prio_a)
        .then_with(|| {
          locale_cmp(cat_a, cat_b)
        })
    }
    | SortMode::PriorityAsc => {
      prio_a
        .cmp(&prio_b)
        .then_with(|| {
          locale_cmp(cat_a, cat_b)
        })
    }
    | SortMode::DateAsc => {
      a.date
        .cmp(&b.date)
        .then(prio_b.cmp(&prio_a))
    }
    | SortMode::DateDesc => {
      b.date
        .cmp(&a.date)
        .then(prio_b.cmp(&prio_a))
    }
    | SortMode::NameAsc => {
      locale_cmp(&a.name, &b.name)
        .then(prio_b.cmp(&prio_a))
    }
    | SortMode::Unsorted => {
      Ordering::Equal
    }
  }
}

/// Collation order for display names.
///
/// Letters compare by their base form
/// first (`Ética` sorts with `etica`),
/// then unaccented before accented, then
/// lowercase before uppercase.
pub fn locale_cmp(
  a: &str,
  b: &str
) -> Ordering {
  collation_base(a)
    .cmp(&collation_base(b))
    .then_with(|| {
      a.to_lowercase()
        .cmp(&b.to_lowercase())
    })
    .then_with(|| b.cmp(a))
}

fn collation_base(s: &str) -> String {
  deunicode::deunicode(s).to_lowercase()
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;
  use crate::event::{
    EventDraft,
    Id,
    Priority
  };

  fn event(
    id: &str,
    name: &str,
    date: &str,
    category: &str,
    priority: Priority
  ) -> Event {
    let date = NaiveDate::parse_from_str(
      date, "%Y-%m-%d"
    )
    .expect("valid date");
    let mut draft =
      EventDraft::new(name, date);
    draft.category_id =
      Id::from(category);
    draft.priority = priority;
    Event::from_draft(
      Id::from(id),
      draft
    )
  }

  fn registry() -> CategoryRegistry {
    let raw = r##"[
      {"id":"default","name":"General","color":"#6b7280"},
      {"id":"w","name":"work","color":"#3b82f6"},
      {"id":"h","name":"Home","color":"#10b981"}
    ]"##;
    serde_json::from_str(raw)
      .expect("categories")
  }

  fn all_allowed(
    categories: &CategoryRegistry
  ) -> FilterState {
    FilterState {
      active_categories: categories
        .ids()
        .cloned()
        .collect(),
      active_priorities:
        BTreeSet::from(Priority::ALL)
    }
  }

  fn ids(events: &[&Event]) -> Vec<String> {
    events
      .iter()
      .map(|e| e.id.to_string())
      .collect()
  }

  fn sample() -> Vec<Event> {
    vec![
      event("1", "b", "2025-06-03", "w", Priority::Low),
      event("2", "a", "2025-06-01", "h", Priority::High),
      event("3", "c", "2025-06-02", "default", Priority::Medium),
      event("4", "A", "2025-06-01", "w", Priority::High),
    ]
  }

  #[test]
  fn singleton_example_and_priority_exclusion()
   {
    let categories = registry();
    let events = vec![event(
      "x",
      "Launch",
      "2025-06-15",
      "default",
      Priority::High
    )];
    let mut filters =
      all_allowed(&categories);

    let out = visible_events(
      &events,
      &categories,
      &filters,
      SortMode::PriorityDesc
    );
    assert_eq!(ids(&out), vec!["x"]);

    filters
      .active_priorities
      .remove(&Priority::High);
    let out = visible_events(
      &events,
      &categories,
      &filters,
      SortMode::PriorityDesc
    );
    assert!(out.is_empty());
  }

  #[test]
  fn sort_modes_follow_key_table() {
    let categories = registry();
    let events = sample();
    let filters =
      all_allowed(&categories);
    let run = |mode| {
      ids(&visible_events(
        &events,
        &categories,
        &filters,
        mode
      ))
    };

    // general < home < work
    assert_eq!(
      run(SortMode::CategoryAsc),
      vec!["3", "2", "4", "1"]
    );
    assert_eq!(
      run(SortMode::PriorityDesc),
      vec!["2", "4", "3", "1"]
    );
    assert_eq!(
      run(SortMode::PriorityAsc),
      vec!["1", "3", "2", "4"]
    );
    assert_eq!(
      run(SortMode::DateAsc),
      vec!["2", "4", "3", "1"]
    );
    assert_eq!(
      run(SortMode::DateDesc),
      vec!["1", "3", "2", "4"]
    );
    assert_eq!(
      run(SortMode::NameAsc),
      vec!["2", "4", "1", "3"]
    );
    assert_eq!(
      run(SortMode::Unsorted),
      vec!["1", "2", "3", "4"]
    );
  }

  #[test]
  fn sorting_twice_is_idempotent() {
    let categories = registry();
    let events = sample();
    let filters =
      all_allowed(&categories);

    for mode in SortMode::ALL {
      let once = visible_events(
        &events,
        &categories,
        &filters,
        mode
      );
      let mut twice = once.clone();
      sort_events(
        &mut twice,
        &categories,
        mode
      );
      assert_eq!(
        ids(&once),
        ids(&twice),
        "{mode}"
      );
    }
  }

  #[test]
  fn filter_is_intersection_and_toggle_restores()
   {
    let categories = registry();
    let events = sample();
    let mut filters =
      all_allowed(&categories);
    filters
      .active_categories
      .remove(&Id::from("w"));

    let out = visible_events(
      &events,
      &categories,
      &filters,
      SortMode::DateAsc
    );
    assert_eq!(ids(&out), vec!["2", "3"]);

    let before = filters.clone();
    assert!(!filters.toggle_priority(
      Priority::Medium
    ));
    assert!(filters.toggle_priority(
      Priority::Medium
    ));
    assert!(filters.toggle_category(
      &Id::from("w")
    ));
    assert!(!filters.toggle_category(
      &Id::from("w")
    ));
    assert_eq!(filters, before);
  }

  #[test]
  fn toggle_all_switches_between_all_and_none()
   {
    let categories = registry();
    let mut filters =
      FilterState::default();
    filters
      .toggle_all_categories(&categories);
    assert_eq!(
      filters.active_categories.len(),
      3
    );
    filters
      .toggle_all_categories(&categories);
    assert!(
      filters
        .active_categories
        .is_empty()
    );
  }

  #[test]
  fn unknown_sort_key_deserializes_to_unsorted()
   {
    let mode: SortMode =
      serde_json::from_str(
        "\"by_vibes\""
      )
      .expect("lenient");
    assert_eq!(mode, SortMode::Unsorted);
    assert!(
      "by_vibes"
        .parse::<SortMode>()
        .is_err()
    );
  }

  #[test]
  fn accented_names_sort_with_their_base_letter()
  {
    assert_eq!(
      locale_cmp("Ética", "Festa"),
      Ordering::Less
    );
    assert_eq!(
      locale_cmp("etica", "Ética"),
      Ordering::Less
    );
    assert_eq!(
      locale_cmp("Zebra", "Árvore"),
      Ordering::Greater
    );

    let categories = registry();
    let events = vec![
      event(
        "1",
        "Zumba",
        "2025-06-02",
        "default",
        Priority::Low
      ),
      event(
        "2",
        "Ótica",
        "2025-06-02",
        "default",
        Priority::Low
      ),
      event(
        "3",
        "Abertura",
        "2025-06-02",
        "default",
        Priority::Low
      ),
    ];
    let visible = visible_events(
      &events,
      &categories,
      &all_allowed(&categories),
      SortMode::NameAsc
    );
    assert_eq!(ids(&visible), vec![
      "3", "2", "1"
    ]);
  }
}
