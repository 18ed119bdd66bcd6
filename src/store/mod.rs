mod schema;
mod sqlite;

pub use sqlite::SqliteCatalog;

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::*;

/// Catalog defines the metadata store interface.
///
/// Mutating operations run inside whatever transaction is currently open on
/// the connection; the coordinator brackets each logical operation with
/// `begin`/`commit` and rolls back before surfacing an error.
pub trait Catalog: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Transaction control
    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    // Repo record
    fn create_repo(&self, name: &str, path: &str, kind: &str) -> Result<i64>;
    fn list_repos(&self) -> Result<Vec<Repo>>;

    // Lifecycle graph
    fn create_state(&self, name: &str) -> Result<i64>;
    fn list_states(&self) -> Result<Vec<StateRow>>;
    fn create_transition(
        &self,
        start_id: i64,
        end_id: i64,
        capability_id: i64,
        hook_name: Option<&str>,
    ) -> Result<i64>;
    fn list_transitions(&self) -> Result<Vec<TransitionRow>>;
    fn add_hook_data(&self, transition_id: i64, value: &str) -> Result<()>;
    fn hook_data(&self, transition_id: i64) -> Result<Vec<String>>;

    // Capabilities and grants
    fn create_capability(&self, row: &CapabilityRow) -> Result<()>;
    fn list_capabilities(&self) -> Result<Vec<CapabilityRow>>;
    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, uid: i64) -> Result<Option<User>>;
    fn grant_capability(&self, uid: i64, capability_id: i64) -> Result<()>;
    fn user_capability_ids(&self, uid: i64) -> Result<HashSet<i64>>;

    // Filesets
    fn create_fileset(
        &self,
        name: &str,
        version: &str,
        revision: &str,
        repo_id: i64,
    ) -> Result<Fileset>;
    fn get_fileset(&self, id: i64) -> Result<Option<Fileset>>;
    fn fileset_by_name(&self, name: &str) -> Result<Option<Fileset>>;
    fn list_filesets(&self, range: &ListRange) -> Result<Vec<Fileset>>;

    // Artifacts
    fn insert_artifact(&self, artifact: &Artifact) -> Result<i64>;
    fn get_artifact(&self, id: i64) -> Result<Option<Artifact>>;
    fn list_artifacts(&self, range: &ListRange) -> Result<Vec<Artifact>>;
    fn fileset_auxiliaries(&self, fileset_id: i64) -> Result<Vec<Artifact>>;
    fn update_artifact_state(
        &self,
        id: i64,
        state_id: i64,
        updated_at: &DateTime<Utc>,
    ) -> Result<()>;

    // Tags (many-to-many with filesets and artifacts)
    fn get_or_create_tag(&self, tag: &str) -> Result<i64>;
    fn attach_fileset_tag(&self, fileset_id: i64, tag_id: i64) -> Result<()>;
    fn attach_artifact_tag(&self, artifact_id: i64, tag_id: i64) -> Result<()>;
    fn fileset_tags(&self, fileset_id: i64) -> Result<Vec<String>>;
    fn artifact_tags(&self, artifact_id: i64) -> Result<Vec<String>>;

    // Properties
    fn add_fileset_property(&self, fileset_id: i64, name: &str, value: &str) -> Result<()>;
    fn add_artifact_property(&self, artifact_id: i64, name: &str, value: &str) -> Result<()>;
    fn fileset_property(&self, fileset_id: i64, name: &str) -> Result<Option<Property>>;
    fn artifact_property(&self, artifact_id: i64, name: &str) -> Result<Option<Property>>;
    fn fileset_properties(&self, fileset_id: i64) -> Result<Vec<Property>>;
    fn artifact_properties(&self, artifact_id: i64) -> Result<Vec<Property>>;
    fn update_property(&self, property_id: i64, value: &str) -> Result<()>;

    fn close(&self) -> Result<()>;
}
