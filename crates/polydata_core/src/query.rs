use serde::{Deserialize, Serialize};

use crate::Poly;

pub const DEFAULT_ITEM_PER_PAGE: u64 = 30;
/// Upper bound accepted for a caller-supplied page size; anything outside
/// `1..=MAX_ITEM_PER_PAGE` falls back to the default.
pub const MAX_ITEM_PER_PAGE: u64 = 256;

/// Listing parameters for `query`/`query_index` calls.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PolyQuery {
    pub tag: Option<String>,
    pub page: u64,
    pub item_per_page: Option<u64>,
    pub random_order: bool,
}

impl PolyQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = page;
        self
    }

    pub fn item_per_page(mut self, item_per_page: u64) -> Self {
        self.item_per_page = Some(item_per_page);
        self
    }

    pub fn random_order(mut self, random_order: bool) -> Self {
        self.random_order = random_order;
        self
    }

    pub fn effective_item_per_page(&self) -> u64 {
        match self.item_per_page {
            Some(value) if (1..=MAX_ITEM_PER_PAGE).contains(&value) => value,
            _ => DEFAULT_ITEM_PER_PAGE,
        }
    }

    pub fn offset(&self) -> u64 {
        self.effective_item_per_page() * self.page
    }
}

/// One page of results plus the total row count ignoring pagination.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PolyList {
    pub list: Vec<Poly>,
    pub count: u64,
}

impl PolyList {
    pub fn new(list: Vec<Poly>, count: u64) -> Self {
        Self { list, count }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}
