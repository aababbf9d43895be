use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const DEFAULT_CATEGORY_ID: &str = "default";
pub const NEUTRAL_COLOR: &str = "#6b7280";

/// Canonical identifier for events and categories.
///
/// Persisted data may carry ids as JSON numbers or strings; both collapse to
/// the same textual form here, so comparisons never need coercion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn default_category() -> Self {
        Self(DEFAULT_CATEGORY_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default_category(&self) -> bool {
        self.0 == DEFAULT_CATEGORY_ID
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for Id {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => Self(text),
            RawId::Number(number) => Self(number.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Value")]
pub enum Priority {
    High,
    Medium,
    #[default]
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    /// Unknown or missing values fall back to `Low`.
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" | "h" => Ok(Priority::High),
            "medium" | "m" => Ok(Priority::Medium),
            "low" | "l" => Ok(Priority::Low),
            other => Err(anyhow!("unknown priority: {other}")),
        }
    }
}

impl From<Value> for Priority {
    fn from(value: Value) -> Self {
        match value {
            Value::String(raw) => Priority::parse_lenient(&raw),
            _ => Priority::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Id,

    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    pub date: NaiveDate,

    #[serde(default = "Id::default_category", deserialize_with = "category_or_default")]
    pub category_id: Id,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
}

/// Every field of an event except its identity. Updates replace the whole
/// record with one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub name: String,
    pub date: NaiveDate,
    pub category_id: Id,
    pub priority: Priority,
    pub description: String,
}

impl EventDraft {
    pub fn new(name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            date,
            category_id: Id::default_category(),
            priority: Priority::Low,
            description: String::new(),
        }
    }
}

impl Event {
    pub fn from_draft(id: Id, draft: EventDraft) -> Self {
        Self {
            id,
            name: draft.name,
            date: draft.date,
            category_id: draft.category_id,
            priority: draft.priority,
            description: draft.description,
        }
    }

    pub fn to_draft(&self) -> EventDraft {
        EventDraft {
            name: self.name.clone(),
            date: self.date,
            category_id: self.category_id.clone(),
            priority: self.priority,
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: Id,

    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    #[serde(default = "neutral_color", deserialize_with = "color_or_neutral")]
    pub color: String,
}

impl Category {
    pub fn general() -> Self {
        Self {
            id: Id::default_category(),
            name: "General".to_string(),
            color: NEUTRAL_COLOR.to_string(),
        }
    }
}

fn neutral_color() -> String {
    NEUTRAL_COLOR.to_string()
}

/// Treats an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn category_or_default<'de, D>(deserializer: D) -> Result<Id, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Id>::deserialize(deserializer)?
        .filter(|id| !id.as_str().is_empty())
        .unwrap_or_else(Id::default_category))
}

fn color_or_neutral<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|color| !color.trim().is_empty())
        .unwrap_or_else(neutral_color))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_string_ids_are_equal() {
        let from_number: Id = serde_json::from_str("1712345678901").expect("numeric id");
        let from_text: Id = serde_json::from_str("\"1712345678901\"").expect("string id");
        assert_eq!(from_number, from_text);
    }

    #[test]
    fn priority_defaults_to_low() {
        let raw = r#"{"id":"a","name":"x","date":"2025-06-15","categoryId":"default"}"#;
        let event: Event = serde_json::from_str(raw).expect("event without priority");
        assert_eq!(event.priority, Priority::Low);

        let raw = r#"{"id":"b","date":"2025-06-15","priority":"urgent"}"#;
        let event: Event = serde_json::from_str(raw).expect("event with odd priority");
        assert_eq!(event.priority, Priority::Low);
        assert!(event.category_id.is_default_category());

        let raw = r#"{"id":"c","date":"2025-06-15","priority":"HIGH"}"#;
        let event: Event = serde_json::from_str(raw).expect("event with upper priority");
        assert_eq!(event.priority, Priority::High);
    }

    #[test]
    fn event_serializes_with_canonical_date() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 5).expect("valid date");
        let event = Event::from_draft(Id::from("7"), EventDraft::new("Dentist", date));
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["date"], "2025-06-05");
        assert_eq!(json["categoryId"], "default");
        assert_eq!(json["priority"], "low");
    }

    #[test]
    fn null_fields_fall_back_to_defaults() {
        let raw = r#"{"id":"n","name":null,"date":"2025-06-15","categoryId":null,"priority":null,"description":null}"#;
        let event: Event = serde_json::from_str(raw).expect("event with nulls");
        assert_eq!(event.name, "");
        assert_eq!(event.description, "");
        assert_eq!(event.priority, Priority::Low);
        assert!(event.category_id.is_default_category());

        let category: Category =
            serde_json::from_str(r#"{"id":5,"name":null,"color":null}"#).expect("category with nulls");
        assert_eq!(category.id, Id::from("5"));
        assert_eq!(category.color, NEUTRAL_COLOR);
    }
}
