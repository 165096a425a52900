use serde::{Deserialize, Serialize};

/// Persisted heap entry, stored at `/keys/<id>`.
///
/// Entries form circular doubly-linked sibling rings: a singleton points
/// at itself through `prev` and `next`. `parent` is empty for root-list
/// entries; `child` names one representative member of the child ring.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeapEntry {
    pub priority: f64,
    pub prev: String,
    pub next: String,
    pub parent: String,
    pub child: String,
    pub degree: i32,
    pub marked: bool,
}

impl HeapEntry {
    /// A fresh singleton ring holding only `id`.
    pub fn singleton(id: &str, priority: f64) -> Self {
        Self {
            priority,
            prev: id.to_string(),
            next: id.to_string(),
            ..Self::default()
        }
    }
}

/// Persisted root record, stored at `/fibroot`.
///
/// `min` is empty exactly when the heap is empty; `min_priority` then
/// reads `0.0` but carries no meaning.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeapRoot {
    pub min: String,
    pub min_priority: f64,
    pub size: u64,
}
