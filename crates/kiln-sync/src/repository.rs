//! Durable store of desired entities
//!
//! Every backend implements the same small CRUD + list interface. Records
//! carry the spec the user asked for, the last status reported from the
//! cluster, and the soft-delete mark.

use async_trait::async_trait;
use kiln_common::crd::EntityStatus;
use kiln_common::Result;
use serde::{Deserialize, Serialize};

/// A repository record of one entity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record<S> {
    /// Unique, immutable entity ID
    pub id: String,
    /// Desired state
    pub spec: S,
    /// Last status reported from the cluster
    #[serde(default)]
    pub status: EntityStatus,
    /// Soft-delete flag
    #[serde(default)]
    pub deletion_mark: bool,
}

impl<S> Record<S> {
    /// A fresh, undeleted record with an empty status
    pub fn new(id: impl Into<String>, spec: S) -> Self {
        Self {
            id: id.into(),
            spec,
            status: EntityStatus::default(),
            deletion_mark: false,
        }
    }

    /// Set the deletion mark (builder style)
    pub fn marked_for_deletion(mut self) -> Self {
        self.deletion_mark = true;
        self
    }
}

/// Pagination and filtering for [`Repository::list`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Zero-based page index
    pub page: usize,
    /// Page size, `None` for everything from `page * size` on
    pub size: Option<usize>,
    /// Only records whose deletion mark equals this value
    pub deletion_marked: Option<bool>,
}

impl ListQuery {
    /// Every record, unfiltered
    pub fn all() -> Self {
        Self::default()
    }

    /// One page of `size` records
    pub fn page(page: usize, size: usize) -> Self {
        Self {
            page,
            size: Some(size),
            deletion_marked: None,
        }
    }

    /// Restrict to records with (or without) a deletion mark
    pub fn deletion_marked(mut self, marked: bool) -> Self {
        self.deletion_marked = Some(marked);
        self
    }

    /// Whether a record passes the filter
    pub fn matches<S>(&self, record: &Record<S>) -> bool {
        self.deletion_marked
            .map_or(true, |marked| record.deletion_mark == marked)
    }

    /// Filter and paginate records already sorted by ID
    pub fn apply<S>(&self, records: impl IntoIterator<Item = Record<S>>) -> Vec<Record<S>> {
        let filtered = records.into_iter().filter(|r| self.matches(r));
        match self.size {
            Some(size) => filtered
                .skip(self.page.saturating_mul(size))
                .take(size)
                .collect(),
            None => filtered.collect(),
        }
    }
}

/// Items of one listing, plus the IDs of stored entries that could not be
/// read
///
/// An unreadable entry still exists; callers must not treat its ID as
/// unknown.
#[derive(Clone, Debug, PartialEq)]
pub struct Listing<T> {
    /// Readable items, ordered by ID
    pub items: Vec<T>,
    /// IDs of entries skipped because they failed to decode
    pub unreadable: Vec<String>,
}

impl<T> Listing<T> {
    /// Convert every readable item, keeping the unreadable IDs
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Listing<U> {
        Listing {
            items: self.items.into_iter().map(f).collect(),
            unreadable: self.unreadable,
        }
    }
}

impl<T> From<Vec<T>> for Listing<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            items,
            unreadable: Vec::new(),
        }
    }
}

/// CRUD + list store of records for one entity kind
///
/// `get` returns `None` for an unknown ID. `create` fails with
/// `Error::AlreadyExists` when the ID is taken; `update`, `update_status`
/// and `delete` fail with `Error::NotFound` when it is not.
#[async_trait]
pub trait Repository<S>: Send + Sync {
    /// Fetch one record
    async fn get(&self, id: &str) -> Result<Option<Record<S>>>;

    /// List records, ordered by ID
    ///
    /// A record that fails to decode is left out of the page and its ID is
    /// reported in [`Listing::unreadable`], whatever the query.
    async fn list(&self, query: &ListQuery) -> Result<Listing<Record<S>>>;

    /// Insert a new record
    async fn create(&self, record: Record<S>) -> Result<()>;

    /// Overwrite an existing record
    async fn update(&self, record: Record<S>) -> Result<()>;

    /// Replace only the status of an existing record
    ///
    /// Spec and deletion mark written concurrently by someone else are kept.
    async fn update_status(&self, id: &str, status: &EntityStatus) -> Result<()>;

    /// Remove a record
    async fn delete(&self, id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<Record<u32>> {
        vec![
            Record::new("a", 1),
            Record::new("b", 2).marked_for_deletion(),
            Record::new("c", 3),
            Record::new("d", 4),
        ]
    }

    #[test]
    fn all_returns_everything() {
        assert_eq!(ListQuery::all().apply(records()).len(), 4);
    }

    #[test]
    fn pages_are_contiguous_slices() {
        let ids = |q: ListQuery| {
            q.apply(records())
                .into_iter()
                .map(|r| r.id)
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(ListQuery::page(0, 3)), vec!["a", "b", "c"]);
        assert_eq!(ids(ListQuery::page(1, 3)), vec!["d"]);
        assert!(ids(ListQuery::page(2, 3)).is_empty());
    }

    #[test]
    fn filter_applies_before_pagination() {
        let marked = ListQuery::all().deletion_marked(true).apply(records());
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].id, "b");

        let live = ListQuery::page(1, 2).deletion_marked(false).apply(records());
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, "d");
    }

    #[test]
    fn huge_page_index_is_empty_rather_than_overflowing() {
        assert!(ListQuery::page(usize::MAX, 10).apply(records()).is_empty());
        assert!(ListQuery::page(usize::MAX / 2, 3).apply(records()).is_empty());
    }

    #[test]
    fn listing_map_keeps_unreadable_ids() {
        let listing = Listing {
            items: records(),
            unreadable: vec!["broken".to_string()],
        };
        let ids = listing.map(|r| r.id);
        assert_eq!(ids.items, vec!["a", "b", "c", "d"]);
        assert_eq!(ids.unreadable, vec!["broken"]);
    }

    #[test]
    fn record_defaults_to_empty_status() {
        let record: Record<u32> = serde_json::from_str(r#"{"id":"x","spec":7}"#).unwrap();
        assert_eq!(record.status, EntityStatus::default());
        assert!(!record.deletion_mark);
    }
}
