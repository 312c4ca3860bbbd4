//! Category ordering rules.
//!
//! Everything here is pure: functions take the current category set and return
//! the rows to delete, the rows to write and the resulting ordered list. The
//! store applies a [`CategoryChanges`] inside a single transaction.
//!
//! Layout: `[time, day, business..., custom...]` with dense positions `0..N-1`.
//! Time, day and business categories are fixed.

use std::collections::{HashMap, HashSet};

use sqlx::types::{time::OffsetDateTime, uuid::Uuid};

use crate::greeting::{dynamic_categories, DynamicCategory, BUSINESS_CATALOG};
use crate::models::{Category, CategoryType};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderingError {
    #[error("category {0} not found")]
    NotFound(Uuid),
    #[error("category \"{0}\" is fixed and cannot be changed")]
    Fixed(String),
    #[error("position {target} is reserved for fixed categories (first {fixed})")]
    IntoFixedRange { target: usize, fixed: usize },
    #[error("position {target} is out of range for {len} categories")]
    OutOfRange { target: usize, len: usize },
    #[error("category name must not be empty")]
    EmptyName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// Outcome of an ordering operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryChanges {
    pub deletes: Vec<Uuid>,
    /// New rows and rows whose content or position changed.
    pub writes: Vec<Category>,
    /// Surviving categories sorted by position.
    pub categories: Vec<Category>,
}

impl CategoryChanges {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.writes.is_empty()
    }
}

/// Position ascending. Rows without a position follow, oldest first.
pub fn sort_by_position(categories: &mut [Category]) {
    categories.sort_by(|a, b| {
        let a_key = (a.position.is_none(), a.position, a.created_at);
        let b_key = (b.position.is_none(), b.position, b.created_at);
        a_key.cmp(&b_key)
    });
}

fn sorted(categories: &[Category]) -> Vec<Category> {
    let mut list = categories.to_vec();
    sort_by_position(&mut list);
    list
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Assigns dense positions to `ordered` and diffs it against `original`.
fn finish(original: &[Category], mut ordered: Vec<Category>, deletes: Vec<Uuid>) -> CategoryChanges {
    for (index, category) in ordered.iter_mut().enumerate() {
        category.position = Some(index as i32);
    }

    let before: HashMap<Uuid, &Category> = original.iter().map(|c| (c.id, c)).collect();
    let writes = ordered
        .iter()
        .filter(|c| before.get(&c.id).map_or(true, |old| *old != *c))
        .cloned()
        .collect();

    CategoryChanges {
        deletes,
        writes,
        categories: ordered,
    }
}

fn new_fixed(name_en: &str, name_kn: &str, category_type: CategoryType, now: OffsetDateTime) -> Category {
    Category {
        id: Uuid::new_v4(),
        name_en: name_en.to_string(),
        name_kn: name_kn.to_string(),
        position: None,
        is_fixed: true,
        is_dynamic: matches!(category_type, CategoryType::Time | CategoryType::Day),
        is_business: category_type == CategoryType::Business,
        category_type,
        created_at: now,
    }
}

fn apply_greeting(category: &mut Category, greeting: &DynamicCategory) {
    category.name_en = greeting.name_en.clone();
    category.name_kn = greeting.name_kn.clone();
}

fn is_business(category: &Category) -> bool {
    category.category_type == CategoryType::Business || category.is_business
}

/// Load-time repair.
///
/// Keeps the first time and day category and deletes their duplicates, creates
/// missing ones and refreshes their text, reconciles the business block with
/// [`BUSINESS_CATALOG`], then lays everything out densely.
pub fn repair(existing: &[Category], now: OffsetDateTime) -> CategoryChanges {
    let list = sorted(existing);
    let mut deletes = Vec::new();
    let mut dynamic = Vec::with_capacity(2);

    for greeting in dynamic_categories(now) {
        let mut same_type = list
            .iter()
            .filter(|c| c.category_type == greeting.category_type);
        let mut category = match same_type.next() {
            Some(first) => first.clone(),
            None => new_fixed(&greeting.name_en, &greeting.name_kn, greeting.category_type, now),
        };
        deletes.extend(same_type.map(|c| c.id));

        apply_greeting(&mut category, &greeting);
        category.is_fixed = true;
        category.is_dynamic = true;
        category.is_business = false;
        dynamic.push(category);
    }

    let mut existing_business: Vec<&Category> = list
        .iter()
        .filter(|c| !matches!(c.category_type, CategoryType::Time | CategoryType::Day) && is_business(c))
        .collect();
    let mut business = Vec::with_capacity(BUSINESS_CATALOG.len());
    for (name_en, name_kn) in BUSINESS_CATALOG {
        let wanted = normalize_name(name_en);
        let found = existing_business
            .iter()
            .position(|c| normalize_name(&c.name_en) == wanted);
        let mut category = match found {
            Some(index) => existing_business.remove(index).clone(),
            None => new_fixed(name_en, name_kn, CategoryType::Business, now),
        };
        category.name_en = name_en.to_string();
        category.name_kn = name_kn.to_string();
        category.category_type = CategoryType::Business;
        category.is_fixed = true;
        category.is_dynamic = false;
        category.is_business = true;
        business.push(category);
    }
    deletes.extend(existing_business.iter().map(|c| c.id));

    let custom = list.iter().filter(|c| {
        !matches!(c.category_type, CategoryType::Time | CategoryType::Day) && !is_business(c)
    });
    let custom: Vec<Category> = custom
        .cloned()
        .map(|mut c| {
            c.is_fixed = false;
            c
        })
        .collect();

    let mut ordered = dynamic;
    ordered.extend(business);
    ordered.extend(custom);
    finish(existing, ordered, deletes)
}

/// Periodic refresh of the dynamic texts. Writes only what changed.
pub fn refresh_dynamic(existing: &[Category], now: OffsetDateTime) -> CategoryChanges {
    let mut list = sorted(existing);
    let mut writes = Vec::new();

    for greeting in dynamic_categories(now) {
        let slot = list
            .iter_mut()
            .find(|c| c.category_type == greeting.category_type);
        if let Some(category) = slot {
            if category.name_en != greeting.name_en || category.name_kn != greeting.name_kn {
                apply_greeting(category, &greeting);
                writes.push(category.clone());
            }
        }
    }

    CategoryChanges {
        deletes: Vec::new(),
        writes,
        categories: list,
    }
}

fn fixed_prefix(list: &[Category]) -> usize {
    list.iter().take_while(|c| c.is_fixed).count()
}

fn locate(list: &[Category], id: Uuid) -> Result<usize, OrderingError> {
    list.iter()
        .position(|c| c.id == id)
        .ok_or(OrderingError::NotFound(id))
}

/// Fails unless `id` exists and is not fixed.
pub fn ensure_editable(categories: &[Category], id: Uuid) -> Result<&Category, OrderingError> {
    let category = categories
        .iter()
        .find(|c| c.id == id)
        .ok_or(OrderingError::NotFound(id))?;
    if category.is_fixed {
        return Err(OrderingError::Fixed(category.name_en.clone()));
    }
    Ok(category)
}

/// Moves a custom category to `target` (zero-based index in display order).
pub fn move_to(categories: &[Category], id: Uuid, target: usize) -> Result<CategoryChanges, OrderingError> {
    ensure_editable(categories, id)?;
    let mut list = sorted(categories);
    let index = locate(&list, id)?;
    let fixed = fixed_prefix(&list);

    if target < fixed {
        return Err(OrderingError::IntoFixedRange { target, fixed });
    }
    if target >= list.len() {
        return Err(OrderingError::OutOfRange {
            target,
            len: list.len(),
        });
    }

    let category = list.remove(index);
    list.insert(target, category);
    Ok(finish(categories, list, Vec::new()))
}

pub fn move_in_direction(
    categories: &[Category],
    id: Uuid,
    direction: Direction,
) -> Result<CategoryChanges, OrderingError> {
    ensure_editable(categories, id)?;
    let list = sorted(categories);
    let index = locate(&list, id)?;
    let target = match direction {
        Direction::Up => index.checked_sub(1).ok_or(OrderingError::IntoFixedRange {
            target: 0,
            fixed: fixed_prefix(&list),
        })?,
        Direction::Down => index + 1,
    };
    move_to(categories, id, target)
}

/// Appends a custom category at the tail.
pub fn append_custom(
    categories: &[Category],
    name_en: &str,
    name_kn: &str,
) -> Result<CategoryChanges, OrderingError> {
    let (name_en, name_kn) = (name_en.trim(), name_kn.trim());
    if name_en.is_empty() || name_kn.is_empty() {
        return Err(OrderingError::EmptyName);
    }
    let mut list = sorted(categories);
    list.push(Category::custom(
        name_en.to_string(),
        name_kn.to_string(),
        list.len() as i32,
    ));
    Ok(finish(categories, list, Vec::new()))
}

pub fn rename(
    categories: &[Category],
    id: Uuid,
    name_en: &str,
    name_kn: &str,
) -> Result<CategoryChanges, OrderingError> {
    let (name_en, name_kn) = (name_en.trim(), name_kn.trim());
    if name_en.is_empty() || name_kn.is_empty() {
        return Err(OrderingError::EmptyName);
    }
    ensure_editable(categories, id)?;
    let mut list = sorted(categories);
    if let Some(category) = list.iter_mut().find(|c| c.id == id) {
        category.name_en = name_en.to_string();
        category.name_kn = name_kn.to_string();
    }
    Ok(finish(categories, list, Vec::new()))
}

/// Deletes a custom category and closes the gap it leaves.
pub fn remove(categories: &[Category], id: Uuid) -> Result<CategoryChanges, OrderingError> {
    ensure_editable(categories, id)?;
    let list: Vec<Category> = sorted(categories)
        .into_iter()
        .filter(|c| c.id != id)
        .collect();
    Ok(finish(categories, list, vec![id]))
}

/// Merges categories whose English names match ignoring case and surrounding
/// whitespace. The survivor of each group is the dynamic one if any, then the
/// one with the lowest position.
pub fn dedupe_by_name(categories: &[Category]) -> CategoryChanges {
    let list = sorted(categories);

    let mut survivors: HashMap<String, &Category> = HashMap::new();
    for category in &list {
        let key = normalize_name(&category.name_en);
        let replace = match survivors.get(&key) {
            Some(current) => category.is_dynamic && !current.is_dynamic,
            None => true,
        };
        if replace {
            survivors.insert(key, category);
        }
    }

    let keep: HashSet<Uuid> = survivors.values().map(|c| c.id).collect();
    let (kept, dropped): (Vec<Category>, Vec<Category>) =
        list.into_iter().partition(|c| keep.contains(&c.id));
    let deletes = dropped.into_iter().map(|c| c.id).collect();
    finish(categories, kept, deletes)
}
