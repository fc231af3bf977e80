use serde::{Deserialize, Serialize};

/// List pagination options; zero values fall back to page 1, limit 10.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
}

impl Pagination {
    pub fn new(page: u64, limit: u64) -> Self {
        Self { page, limit }
    }

    pub fn normalized(self) -> Self {
        Self {
            page: if self.page == 0 { 1 } else { self.page },
            limit: if self.limit == 0 { 10 } else { self.limit },
        }
    }

    /// Returns the requested page; an offset beyond the input yields an
    /// empty page.
    pub fn slice<T>(self, items: Vec<T>) -> Vec<T> {
        let normalized = self.normalized();
        let offset = (normalized.page - 1).saturating_mul(normalized.limit) as usize;
        if offset >= items.len() {
            return Vec::new();
        }
        items
            .into_iter()
            .skip(offset)
            .take(normalized.limit as usize)
            .collect()
    }
}
