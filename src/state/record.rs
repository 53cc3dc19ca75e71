use super::cursor::Cursor;
use super::quota::QuotaState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The kinds of entity the remote API lists by cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Users,
    Organizations,
    Repositories,
}

impl EntityKind {
    /// Returns the string representation of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Users => "users",
            EntityKind::Organizations => "organizations",
            EntityKind::Repositories => "repositories",
        }
    }

    /// Whether the list endpoint for this kind honours a page size
    pub fn supports_page_size(&self) -> bool {
        !matches!(self, EntityKind::Repositories)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "users" | "user" => Ok(EntityKind::Users),
            "organizations" | "organization" | "orgs" | "org" => Ok(EntityKind::Organizations),
            "repositories" | "repository" | "repos" | "repo" => Ok(EntityKind::Repositories),
            other => Err(format!(
                "unknown entity kind '{}' (expected users, organizations or repositories)",
                other
            )),
        }
    }
}

/// One entity from a listing page
///
/// Only the identifier is interpreted; everything else the API returned is
/// kept verbatim in `attributes`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Which listing this record came from
    pub kind: EntityKind,

    /// Remote identifier; doubles as the pagination cursor
    pub id: u64,

    /// The raw API object
    pub attributes: Value,
}

impl Record {
    /// Builds a record from a raw API object
    ///
    /// Returns `None` if the object carries no unsigned integer `id`.
    pub fn from_value(kind: EntityKind, attributes: Value) -> Option<Self> {
        let id = attributes.get("id")?.as_u64()?;
        Some(Self {
            kind,
            id,
            attributes,
        })
    }

    /// The cursor that follows this record
    pub fn cursor(&self) -> Cursor {
        Cursor(self.id)
    }

    /// Whether this is a repository flagged as a fork
    pub fn is_fork(&self) -> bool {
        self.kind == EntityKind::Repositories
            && self
                .attributes
                .get("fork")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}

/// One bounded batch of records and the quota reported alongside it
///
/// An empty page is the sentinel for "population exhausted at this cursor".
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<Record>,
    pub quota: QuotaState,
}

impl Page {
    /// Whether the page signals that nothing follows its cursor
    pub fn is_exhausted(&self) -> bool {
        self.records.is_empty()
    }

    /// The cursor derived from the page's last record
    pub fn last_cursor(&self) -> Option<Cursor> {
        self.records.last().map(Record::cursor)
    }
}
