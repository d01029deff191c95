//! Catalog query: filter and sort items for display
use crate::item::{Category, Item};
use chrono::NaiveDate;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl FromStr for SortOrder {
    type Err = std::convert::Infallible;

    // Anything other than OLDEST falls back to newest first
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("OLDEST") {
            Ok(SortOrder::Oldest)
        } else {
            Ok(SortOrder::Newest)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    search: Option<String>,
    category: Option<Category>,
    date: Option<NaiveDate>,
    sort: SortOrder,
}

impl ItemFilter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn search(mut self, text: &str) -> Self {
        let text = text.trim();
        self.search = (!text.is_empty()).then(|| text.to_lowercase());
        self
    }
    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }
    pub fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// Build a filter from raw query strings.
    ///
    /// `category` of `ALL` means no category filter. Returns `None` when the
    /// query cannot match anything: an unknown category or a date that is not
    /// `YYYY-MM-DD`.
    pub fn from_query(
        search: Option<&str>,
        category: Option<&str>,
        sort: Option<&str>,
        date: Option<&str>,
    ) -> Option<Self> {
        let mut filter = ItemFilter::new();

        if let Some(text) = search {
            filter = filter.search(text);
        }
        if let Some(raw) = category.map(str::trim).filter(|c| !c.is_empty()) {
            if !raw.eq_ignore_ascii_case("ALL") {
                filter = filter.category(raw.parse().ok()?);
            }
        }
        if let Some(raw) = date.map(str::trim).filter(|d| !d.is_empty()) {
            filter = filter.date(NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?);
        }
        if let Some(raw) = sort {
            filter = filter.sort(raw.parse().unwrap_or_default());
        }

        Some(filter)
    }

    pub fn matches(&self, item: &Item) -> bool {
        if let Some(needle) = &self.search {
            let hit = [
                item.metadata.name.as_str(),
                item.category.as_str(),
                item.metadata.creator.as_str(),
                item.id.as_str(),
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(needle.as_str()));

            if !hit {
                return false;
            }
        }
        if self.category.is_some_and(|category| category != item.category) {
            return false;
        }
        if self
            .date
            .is_some_and(|date| date != item.metadata.created_at.day())
        {
            return false;
        }
        true
    }

    pub fn apply(&self, items: Vec<Item>) -> Vec<Item> {
        let mut items: Vec<Item> = items.into_iter().filter(|item| self.matches(item)).collect();

        items.sort_by(|a, b| {
            (&a.metadata.created_at, a.seq).cmp(&(&b.metadata.created_at, b.seq))
        });
        if self.sort == SortOrder::Newest {
            items.reverse();
        }
        items
    }
}
