use anyhow::anyhow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::event::{Event, EventDraft, Id};

/// Insertion-ordered collection of events. Every operation is visible to the
/// next read; nothing is batched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, id: &Id) -> Option<&Event> {
        self.events.iter().find(|event| &event.id == id)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.get(id).is_some()
    }

    #[instrument(skip(self, draft), fields(name = %draft.name, date = %draft.date))]
    pub fn create(&mut self, draft: EventDraft) -> &Event {
        let mut id = Id::generate();
        while self.contains(&id) {
            id = Id::generate();
        }
        info!(id = %id, "created event");
        self.events.push(Event::from_draft(id, draft));
        &self.events[self.events.len() - 1]
    }

    /// Appends an event that already carries its id. Returns `false` and
    /// leaves the store untouched when the id is taken.
    pub fn insert(&mut self, event: Event) -> bool {
        if self.contains(&event.id) {
            debug!(id = %event.id, "event id already present; skipping insert");
            return false;
        }
        self.events.push(event);
        true
    }

    #[instrument(skip(self, draft))]
    pub fn update(&mut self, id: &Id, draft: EventDraft) -> anyhow::Result<&Event> {
        let slot = self
            .events
            .iter_mut()
            .find(|event| &event.id == id)
            .ok_or_else(|| anyhow!("event not found: {id}"))?;
        *slot = Event::from_draft(id.clone(), draft);
        Ok(slot)
    }

    #[instrument(skip(self))]
    pub fn delete(&mut self, id: &Id) -> anyhow::Result<Event> {
        let idx = self
            .events
            .iter()
            .position(|event| &event.id == id)
            .ok_or_else(|| anyhow!("event not found: {id}"))?;
        Ok(self.events.remove(idx))
    }

    /// Changes only the date of an event.
    #[instrument(skip(self))]
    pub fn move_to(&mut self, id: &Id, date: NaiveDate) -> anyhow::Result<&Event> {
        let slot = self
            .events
            .iter_mut()
            .find(|event| &event.id == id)
            .ok_or_else(|| anyhow!("event not found: {id}"))?;
        slot.date = date;
        Ok(slot)
    }

    pub(crate) fn reassign_category(&mut self, from: &Id, to: &Id) -> usize {
        let mut moved = 0;
        for event in self.events.iter_mut().filter(|event| &event.category_id == from) {
            event.category_id = to.clone();
            moved += 1;
        }
        moved
    }

    pub(crate) fn remove_category_events(&mut self, category: &Id) -> usize {
        let before = self.events.len();
        self.events.retain(|event| &event.category_id != category);
        before - self.events.len()
    }
}
