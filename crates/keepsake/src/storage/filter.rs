//! Attribute queries over stored memories
//!
//! A [`MemoryQuery`] is pushed down to LanceDB as a SQL predicate where the
//! column exists, and re-checked in Rust with [`MemoryQuery::matches`] so both
//! store implementations agree on the result set.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::memory::types::{Memory, MemoryType};

/// Result ordering for attribute queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryOrder {
    /// Ascending id, stable for cursor pagination
    #[default]
    Id,
    /// Newest first
    CreatedDesc,
    /// Most important first, newest breaking ties
    ImportanceDesc,
}

/// Filter criteria for attribute queries.
///
/// All fields are optional - when `None`, that filter is not applied.
/// Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub owner_id: Option<String>,
    /// Filter by specific memory types (OR logic within this filter)
    pub memory_types: Option<Vec<MemoryType>>,
    pub category: Option<String>,
    /// Inclusive lower bound on importance
    pub min_importance: Option<f32>,
    /// Exclusive lower bound on importance
    pub importance_above: Option<f32>,
    /// Exclusive upper bound on importance
    pub importance_below: Option<f32>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Exclusive upper bound on access count
    pub access_below: Option<u32>,
    pub archived: Option<bool>,
    pub pending: Option<bool>,
    pub has_embedding: Option<bool>,
    /// Case-insensitive substring of the content
    pub content_contains: Option<String>,
    /// Only memories whose `expires_at` is at or before this instant
    pub expired_before: Option<DateTime<Utc>>,
    /// Cursor: only ids strictly greater than this one
    pub after_id: Option<Uuid>,
    pub limit: Option<usize>,
    pub order: QueryOrder,
}

impl MemoryQuery {
    /// Create a new empty query (no filtering applied)
    pub fn new() -> Self {
        Self::default()
    }

    /// Query scoped to one owner
    pub fn for_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::default()
        }
    }

    pub fn with_memory_types(mut self, types: Vec<MemoryType>) -> Self {
        self.memory_types = Some(types);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_min_importance(mut self, importance: f32) -> Self {
        self.min_importance = Some(importance);
        self
    }

    pub fn with_importance_above(mut self, importance: f32) -> Self {
        self.importance_above = Some(importance);
        self
    }

    pub fn with_importance_below(mut self, importance: f32) -> Self {
        self.importance_below = Some(importance);
        self
    }

    pub fn created_after(mut self, since: DateTime<Utc>) -> Self {
        self.created_after = Some(since);
        self
    }

    pub fn created_before(mut self, until: DateTime<Utc>) -> Self {
        self.created_before = Some(until);
        self
    }

    pub fn with_access_below(mut self, count: u32) -> Self {
        self.access_below = Some(count);
        self
    }

    pub fn with_archived(mut self, archived: bool) -> Self {
        self.archived = Some(archived);
        self
    }

    pub fn with_pending(mut self, pending: bool) -> Self {
        self.pending = Some(pending);
        self
    }

    pub fn with_has_embedding(mut self, has_embedding: bool) -> Self {
        self.has_embedding = Some(has_embedding);
        self
    }

    pub fn containing(mut self, text: impl Into<String>) -> Self {
        self.content_contains = Some(text.into());
        self
    }

    pub fn expired_before(mut self, at: DateTime<Utc>) -> Self {
        self.expired_before = Some(at);
        self
    }

    pub fn after(mut self, id: Uuid) -> Self {
        self.after_id = Some(id);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn ordered_by(mut self, order: QueryOrder) -> Self {
        self.order = order;
        self
    }

    /// Build a SQL WHERE clause from this query.
    /// Returns `None` if no pushable filters are set.
    pub fn to_sql_clause(&self) -> Option<String> {
        let mut conditions = Vec::new();

        if let Some(ref owner) = self.owner_id {
            conditions.push(format!("owner_id = '{}'", escape_sql(owner)));
        }

        // Memory types filter (OR within types)
        if let Some(ref types) = self.memory_types {
            if !types.is_empty() {
                if types.len() == 1 {
                    conditions.push(format!("memory_type = '{}'", types[0].as_str()));
                } else {
                    let in_clause = types
                        .iter()
                        .map(|t| format!("'{}'", t.as_str()))
                        .collect::<Vec<_>>()
                        .join(", ");
                    conditions.push(format!("memory_type IN ({in_clause})"));
                }
            }
        }

        if let Some(ref category) = self.category {
            conditions.push(format!("category = '{}'", escape_sql(category)));
        }

        if let Some(min) = self.min_importance {
            conditions.push(format!("importance >= {min}"));
        }
        if let Some(above) = self.importance_above {
            conditions.push(format!("importance > {above}"));
        }
        if let Some(below) = self.importance_below {
            conditions.push(format!("importance < {below}"));
        }

        // timestamps are stored as microseconds since epoch
        if let Some(ref since) = self.created_after {
            conditions.push(format!("created_at >= {}", since.timestamp_micros()));
        }
        if let Some(ref until) = self.created_before {
            conditions.push(format!("created_at < {}", until.timestamp_micros()));
        }

        if let Some(count) = self.access_below {
            conditions.push(format!("access_count < {count}"));
        }

        if let Some(archived) = self.archived {
            conditions.push(format!("archived = {archived}"));
        }
        if let Some(pending) = self.pending {
            conditions.push(format!("pending = {pending}"));
        }
        if let Some(has_embedding) = self.has_embedding {
            conditions.push(format!("has_embedding = {has_embedding}"));
        }

        if let Some(ref text) = self.content_contains {
            conditions.push(format!(
                "lower(content) LIKE '%{}%'",
                escape_sql(&text.to_lowercase())
            ));
        }

        if let Some(ref at) = self.expired_before {
            conditions.push(format!(
                "expires_at IS NOT NULL AND expires_at <= {}",
                at.timestamp_micros()
            ));
        }

        if let Some(ref id) = self.after_id {
            conditions.push(format!("id > '{id}'"));
        }

        if conditions.is_empty() {
            None
        } else {
            Some(conditions.join(" AND "))
        }
    }

    /// Evaluate every predicate against an in-memory record
    pub fn matches(&self, memory: &Memory) -> bool {
        if let Some(ref owner) = self.owner_id {
            if &memory.owner_id != owner {
                return false;
            }
        }
        if let Some(ref types) = self.memory_types {
            if !types.is_empty() && !types.contains(&memory.memory_type) {
                return false;
            }
        }
        if let Some(ref category) = self.category {
            if &memory.category != category {
                return false;
            }
        }
        if self.min_importance.is_some_and(|min| memory.importance < min) {
            return false;
        }
        if self.importance_above.is_some_and(|above| memory.importance <= above) {
            return false;
        }
        if self.importance_below.is_some_and(|below| memory.importance >= below) {
            return false;
        }
        if self.created_after.is_some_and(|since| memory.created_at < since) {
            return false;
        }
        if self.created_before.is_some_and(|until| memory.created_at >= until) {
            return false;
        }
        if self.access_below.is_some_and(|count| memory.access_count >= count) {
            return false;
        }
        if self.archived.is_some_and(|a| memory.is_archived() != a) {
            return false;
        }
        if self.pending.is_some_and(|p| memory.is_pending() != p) {
            return false;
        }
        if self.has_embedding.is_some_and(|h| memory.has_embedding() != h) {
            return false;
        }
        if let Some(ref text) = self.content_contains {
            if !memory.content.to_lowercase().contains(&text.to_lowercase()) {
                return false;
            }
        }
        if let Some(at) = self.expired_before {
            if !memory.is_expired(at) {
                return false;
            }
        }
        if self.after_id.is_some_and(|after| memory.id <= after) {
            return false;
        }
        true
    }

    /// Sort by the requested order and truncate to the limit
    pub fn finish(&self, mut memories: Vec<Memory>) -> Vec<Memory> {
        match self.order {
            QueryOrder::Id => memories.sort_by_key(|m| m.id),
            QueryOrder::CreatedDesc => {
                memories.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)))
            }
            QueryOrder::ImportanceDesc => memories.sort_by(|a, b| {
                b.importance
                    .total_cmp(&a.importance)
                    .then(b.created_at.cmp(&a.created_at))
            }),
        }
        if let Some(limit) = self.limit {
            memories.truncate(limit);
        }
        memories
    }

    /// Copy of this query without pagination, for counting
    pub fn unbounded(&self) -> Self {
        Self {
            after_id: None,
            limit: None,
            ..self.clone()
        }
    }
}

/// Escape a string literal for a LanceDB predicate
pub(crate) fn escape_sql(value: &str) -> String {
    value.replace('\'', "''")
}
