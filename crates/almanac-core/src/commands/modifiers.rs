use anyhow::anyhow;
use chrono::NaiveDate;
use tracing::instrument;

use crate::category::CategoryRegistry;
use crate::datetime::parse_date_arg;
use crate::event::{
  EventDraft,
  Id,
  Priority
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mod {
  Name(String),
  Date(NaiveDate),
  Category(String),
  Priority(Priority),
  Description(String)
}

/// Splits `add` arguments into the
/// event name and `key:value`
/// modifiers. Everything after `--` is
/// name text.
#[instrument(skip(args, today))]
pub(crate) fn parse_name_and_mods(
  args: &[String],
  today: NaiveDate
) -> anyhow::Result<(String, Vec<Mod>)>
{
  let mut name_parts = Vec::new();
  let mut mods = Vec::new();

  let mut literal = false;
  for arg in args {
    if arg == "--" {
      literal = true;
      continue;
    }

    if !literal
      && let Some(one_mod) =
        parse_one_mod(arg, today)?
    {
      mods.push(one_mod);
      continue;
    }

    name_parts.push(arg.clone());
  }

  Ok((name_parts.join(" "), mods))
}

fn parse_one_mod(
  tok: &str,
  today: NaiveDate
) -> anyhow::Result<Option<Mod>> {
  let Some((key, value)) =
    tok.split_once(':')
  else {
    return Ok(None);
  };

  let key = key.to_ascii_lowercase();

  match key.as_str() {
    | "name" => {
      Ok(Some(Mod::Name(
        value.to_string()
      )))
    }
    | "date" | "on" => {
      Ok(Some(Mod::Date(
        parse_date_arg(value, today)?
      )))
    }
    | "cat" | "category" => {
      Ok(Some(Mod::Category(
        value.to_string()
      )))
    }
    | "pri" | "priority" => {
      Ok(Some(Mod::Priority(
        value.parse()?
      )))
    }
    | "desc" | "description" => {
      Ok(Some(Mod::Description(
        value.to_string()
      )))
    }
    | _ => Ok(None)
  }
}

/// Finds a category by id, then by
/// case-insensitive name.
pub(crate) fn resolve_category(
  categories: &CategoryRegistry,
  token: &str
) -> anyhow::Result<Id> {
  let id = Id::from(token.trim());
  if categories.get(&id).is_some() {
    return Ok(id);
  }
  categories
    .iter()
    .find(|cat| {
      cat.name.eq_ignore_ascii_case(
        token.trim()
      )
    })
    .map(|cat| cat.id.clone())
    .ok_or_else(|| {
      anyhow!(
        "unknown category: {token} \
         (see `almanac categories`)"
      )
    })
}

pub(crate) fn apply_mods(
  draft: &mut EventDraft,
  mods: &[Mod],
  categories: &CategoryRegistry
) -> anyhow::Result<()> {
  for one_mod in mods {
    match one_mod {
      | Mod::Name(name) => {
        draft.name = name.clone();
      }
      | Mod::Date(date) => {
        draft.date = *date;
      }
      | Mod::Category(token) => {
        draft.category_id =
          resolve_category(
            categories, token
          )?;
      }
      | Mod::Priority(priority) => {
        draft.priority = *priority;
      }
      | Mod::Description(text) => {
        draft.description =
          text.clone();
      }
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 18)
      .expect("date")
  }

  fn args(raw: &[&str]) -> Vec<String> {
    raw
      .iter()
      .map(|s| s.to_string())
      .collect()
  }

  #[test]
  fn name_words_and_mods_split() {
    let (name, mods) =
      parse_name_and_mods(
        &args(&[
          "Team",
          "sync",
          "date:tomorrow",
          "pri:h",
          "--",
          "re:",
          "planning"
        ]),
        today()
      )
      .expect("parse");

    assert_eq!(
      name,
      "Team sync re: planning"
    );
    assert_eq!(mods, vec![
      Mod::Date(
        NaiveDate::from_ymd_opt(
          2025, 6, 19
        )
        .expect("date")
      ),
      Mod::Priority(Priority::High)
    ]);
  }

  #[test]
  fn bad_priority_is_rejected() {
    assert!(
      parse_name_and_mods(
        &args(&["x", "pri:urgent"]),
        today()
      )
      .is_err()
    );
  }

  #[test]
  fn categories_resolve_by_id_or_name()
  {
    let mut categories =
      CategoryRegistry::default();
    let work =
      categories.create("Work", "#000");

    let mut draft = EventDraft::new(
      "x",
      today()
    );
    apply_mods(
      &mut draft,
      &[Mod::Category(
        "work".to_string()
      )],
      &categories
    )
    .expect("by name");
    assert_eq!(draft.category_id, work);

    apply_mods(
      &mut draft,
      &[Mod::Category(
        "default".to_string()
      )],
      &categories
    )
    .expect("by id");
    assert!(
      draft
        .category_id
        .is_default_category()
    );

    assert!(
      apply_mods(
        &mut draft,
        &[Mod::Category(
          "nope".to_string()
        )],
        &categories
      )
      .is_err()
    );
  }
}
