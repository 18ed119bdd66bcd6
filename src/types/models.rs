use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The record describing where artifact bytes live. A depot always holds
/// exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRow {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRow {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub uid: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRow {
    pub id: i64,
    pub start_id: i64,
    pub end_id: i64,
    pub capability_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fileset {
    pub id: i64,
    pub name: String,
    pub version: String,
    pub revision: String,
    pub repo_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: i64,
    pub fileset_id: i64,
    pub name: String,
    pub path: String,
    pub is_primary: bool,
    pub state_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source: String,
    pub checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub id: i64,
    pub name: String,
    pub value: String,
}

/// Caller-supplied fields for a new artifact; everything else (state,
/// timestamps, checksum) is derived during ingestion.
#[derive(Debug, Clone)]
pub struct ArtifactSpec {
    pub fileset_id: i64,
    pub name: String,
    pub path: String,
    pub is_primary: bool,
    pub source: String,
}

/// Pagination window for listing operations: entries with an id greater
/// than `start_at` are returned, at most `count` of them, ordered by id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListRange {
    pub start_at: Option<i64>,
    pub count: Option<u32>,
}
