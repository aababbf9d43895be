use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::event::{Category, Id, NEUTRAL_COLOR};

/// Display fields of a category, or the neutral fallback when an event points
/// at a category that no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryDisplay<'a> {
    pub name: &'a str,
    pub color: &'a str,
}

impl CategoryDisplay<'_> {
    pub const FALLBACK: CategoryDisplay<'static> = CategoryDisplay {
        name: "",
        color: NEUTRAL_COLOR,
    };
}

/// Ordered set of categories. The reserved `default` category is always
/// present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Category>", into = "Vec<Category>")]
pub struct CategoryRegistry {
    categories: Vec<Category>,
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        Self {
            categories: vec![Category::general()],
        }
    }
}

impl From<Vec<Category>> for CategoryRegistry {
    fn from(categories: Vec<Category>) -> Self {
        let mut registry = Self { categories };
        if registry.get(&Id::default_category()).is_none() {
            debug!("restoring missing default category");
            registry.categories.insert(0, Category::general());
        }
        registry
    }
}

impl From<CategoryRegistry> for Vec<Category> {
    fn from(registry: CategoryRegistry) -> Self {
        registry.categories
    }
}

impl CategoryRegistry {
    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn get(&self, id: &Id) -> Option<&Category> {
        self.categories.iter().find(|cat| &cat.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|cat| cat.name == name)
    }

    pub fn ids(&self) -> impl Iterator<Item = &Id> {
        self.categories.iter().map(|cat| &cat.id)
    }

    pub fn resolve(&self, id: &Id) -> CategoryDisplay<'_> {
        self.get(id)
            .map(|cat| CategoryDisplay {
                name: cat.name.as_str(),
                color: cat.color.as_str(),
            })
            .unwrap_or(CategoryDisplay::FALLBACK)
    }

    /// Replaces the category with the same id, or appends it. Returns `true`
    /// when the category is new.
    #[instrument(skip(self, category), fields(id = %category.id))]
    pub fn upsert(&mut self, category: Category) -> bool {
        if let Some(existing) = self.categories.iter_mut().find(|cat| cat.id == category.id) {
            *existing = category;
            false
        } else {
            self.categories.push(category);
            true
        }
    }

    pub fn create(&mut self, name: &str, color: &str) -> Id {
        let mut id = Id::generate();
        while self.get(&id).is_some() {
            id = Id::generate();
        }
        self.categories.push(Category {
            id: id.clone(),
            name: name.to_string(),
            color: color.to_string(),
        });
        id
    }

    /// Drops a category. Callers decide what happens to its events first.
    pub(crate) fn remove(&mut self, id: &Id) -> anyhow::Result<Option<Category>> {
        if id.is_default_category() {
            return Err(anyhow!("the default category cannot be removed"));
        }
        let removed = self
            .categories
            .iter()
            .position(|cat| &cat.id == id)
            .map(|idx| self.categories.remove(idx));
        Ok(removed)
    }
}
