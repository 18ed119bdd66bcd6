use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::Catalog;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory catalog, used by unit tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in catalog: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn artifact_from_row(row: &Row<'_>) -> rusqlite::Result<Artifact> {
    Ok(Artifact {
        id: row.get(0)?,
        fileset_id: row.get(1)?,
        name: row.get(2)?,
        path: row.get(3)?,
        is_primary: row.get(4)?,
        state_id: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
        source: row.get(8)?,
        checksum: row.get(9)?,
        compression: row.get(10)?,
    })
}

const ARTIFACT_COLUMNS: &str = "id, fileset_id, name, path, is_primary, state_id, \
     created_at, updated_at, source, checksum, compression";

impl Catalog for SqliteCatalog {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Transaction control

    fn begin(&self) -> Result<()> {
        self.conn().execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.conn().execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.conn().execute_batch("ROLLBACK")?;
        Ok(())
    }

    // Repo record

    fn create_repo(&self, name: &str, path: &str, kind: &str) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO repos (name, path, kind) VALUES (?1, ?2, ?3)",
            params![name, path, kind],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_repos(&self) -> Result<Vec<Repo>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name, path, kind FROM repos ORDER BY id")?;

        let rows = stmt.query_map([], |row| {
            Ok(Repo {
                id: row.get(0)?,
                name: row.get(1)?,
                path: row.get(2)?,
                kind: row.get(3)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Lifecycle graph

    fn create_state(&self, name: &str) -> Result<i64> {
        let conn = self.conn();
        conn.execute("INSERT INTO states (name) VALUES (?1)", params![name])?;
        Ok(conn.last_insert_rowid())
    }

    fn list_states(&self) -> Result<Vec<StateRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name FROM states ORDER BY id")?;

        let rows = stmt.query_map([], |row| {
            Ok(StateRow {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn create_transition(
        &self,
        start_id: i64,
        end_id: i64,
        capability_id: i64,
        hook_name: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO transitions (start_id, end_id, capability_id, hook_name)
             VALUES (?1, ?2, ?3, ?4)",
            params![start_id, end_id, capability_id, hook_name],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_transitions(&self) -> Result<Vec<TransitionRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, start_id, end_id, capability_id, hook_name
             FROM transitions ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(TransitionRow {
                id: row.get(0)?,
                start_id: row.get(1)?,
                end_id: row.get(2)?,
                capability_id: row.get(3)?,
                hook_name: row.get(4)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn add_hook_data(&self, transition_id: i64, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO hook_data (transition_id, value) VALUES (?1, ?2)",
            params![transition_id, value],
        )?;
        Ok(())
    }

    fn hook_data(&self, transition_id: i64) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT value FROM hook_data WHERE transition_id = ?1 ORDER BY rowid")?;

        let rows = stmt.query_map(params![transition_id], |row| row.get(0))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Capabilities and grants

    fn create_capability(&self, row: &CapabilityRow) -> Result<()> {
        self.conn().execute(
            "INSERT INTO capabilities (id, name, description) VALUES (?1, ?2, ?3)",
            params![row.id, row.name, row.description],
        )?;
        Ok(())
    }

    fn list_capabilities(&self) -> Result<Vec<CapabilityRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name, description FROM capabilities ORDER BY id")?;

        let rows = stmt.query_map([], |row| {
            Ok(CapabilityRow {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn create_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (uid, name) VALUES (?1, ?2)",
            params![user.uid, user.name],
        )?;
        Ok(())
    }

    fn get_user(&self, uid: i64) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT uid, name FROM users WHERE uid = ?1",
            params![uid],
            |row| {
                Ok(User {
                    uid: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn grant_capability(&self, uid: i64, capability_id: i64) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO user_capabilities (user_id, capability_id) VALUES (?1, ?2)",
            params![uid, capability_id],
        )?;
        Ok(())
    }

    fn user_capability_ids(&self, uid: i64) -> Result<HashSet<i64>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT capability_id FROM user_capabilities WHERE user_id = ?1")?;

        let rows = stmt.query_map(params![uid], |row| row.get(0))?;

        rows.collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(Error::from)
    }

    // Filesets

    fn create_fileset(
        &self,
        name: &str,
        version: &str,
        revision: &str,
        repo_id: i64,
    ) -> Result<Fileset> {
        let conn = self.conn();
        let result = conn.execute(
            "INSERT INTO filesets (name, version, revision, repo_id) VALUES (?1, ?2, ?3, ?4)",
            params![name, version, revision, repo_id],
        );

        match result {
            Ok(_) => Ok(Fileset {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                version: version.to_string(),
                revision: revision.to_string(),
                repo_id,
            }),
            Err(e) if is_constraint_violation(&e) => Err(Error::FilesetExists(name.to_string())),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_fileset(&self, id: i64) -> Result<Option<Fileset>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, version, revision, repo_id FROM filesets WHERE id = ?1",
            params![id],
            |row| {
                Ok(Fileset {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    version: row.get(2)?,
                    revision: row.get(3)?,
                    repo_id: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn fileset_by_name(&self, name: &str) -> Result<Option<Fileset>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, version, revision, repo_id FROM filesets WHERE name = ?1",
            params![name],
            |row| {
                Ok(Fileset {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    version: row.get(2)?,
                    revision: row.get(3)?,
                    repo_id: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_filesets(&self, range: &ListRange) -> Result<Vec<Fileset>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, version, revision, repo_id
             FROM filesets WHERE id > ?1 ORDER BY id LIMIT ?2",
        )?;

        let rows = stmt.query_map(
            params![
                range.start_at.unwrap_or(0),
                range.count.map_or(-1, i64::from)
            ],
            |row| {
                Ok(Fileset {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    version: row.get(2)?,
                    revision: row.get(3)?,
                    repo_id: row.get(4)?,
                })
            },
        )?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Artifacts

    fn insert_artifact(&self, artifact: &Artifact) -> Result<i64> {
        let conn = self.conn();
        let result = conn.execute(
            "INSERT INTO artifacts (fileset_id, name, path, is_primary, state_id,
                                    created_at, updated_at, source, checksum, compression)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                artifact.fileset_id,
                artifact.name,
                artifact.path,
                artifact.is_primary,
                artifact.state_id,
                format_datetime(&artifact.created_at),
                format_datetime(&artifact.updated_at),
                artifact.source,
                artifact.checksum,
                artifact.compression,
            ],
        );

        match result {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_constraint_violation(&e) => Err(Error::ArtifactExists(format!(
                "{}/{}",
                artifact.path, artifact.name
            ))),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_artifact(&self, id: i64) -> Result<Option<Artifact>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE id = ?1"),
            params![id],
            artifact_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_artifacts(&self, range: &ListRange) -> Result<Vec<Artifact>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;

        let rows = stmt.query_map(
            params![
                range.start_at.unwrap_or(0),
                range.count.map_or(-1, i64::from)
            ],
            artifact_from_row,
        )?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn fileset_auxiliaries(&self, fileset_id: i64) -> Result<Vec<Artifact>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts
             WHERE fileset_id = ?1 AND is_primary = 0 ORDER BY id"
        ))?;

        let rows = stmt.query_map(params![fileset_id], artifact_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_artifact_state(
        &self,
        id: i64,
        state_id: i64,
        updated_at: &DateTime<Utc>,
    ) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE artifacts SET state_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![state_id, format_datetime(updated_at), id],
        )?;

        if rows == 0 {
            return Err(Error::ArtifactNotFound(id));
        }
        Ok(())
    }

    // Tags

    fn get_or_create_tag(&self, tag: &str) -> Result<i64> {
        let conn = self.conn();
        conn.execute("INSERT OR IGNORE INTO tags (tag) VALUES (?1)", params![tag])?;
        conn.query_row("SELECT id FROM tags WHERE tag = ?1", params![tag], |row| {
            row.get(0)
        })
        .map_err(Error::from)
    }

    fn attach_fileset_tag(&self, fileset_id: i64, tag_id: i64) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO fileset_tags (fileset_id, tag_id) VALUES (?1, ?2)",
            params![fileset_id, tag_id],
        )?;
        Ok(())
    }

    fn attach_artifact_tag(&self, artifact_id: i64, tag_id: i64) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO artifact_tags (artifact_id, tag_id) VALUES (?1, ?2)",
            params![artifact_id, tag_id],
        )?;
        Ok(())
    }

    fn fileset_tags(&self, fileset_id: i64) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.tag FROM tags t
             JOIN fileset_tags ft ON ft.tag_id = t.id
             WHERE ft.fileset_id = ?1 ORDER BY t.tag",
        )?;

        let rows = stmt.query_map(params![fileset_id], |row| row.get(0))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn artifact_tags(&self, artifact_id: i64) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.tag FROM tags t
             JOIN artifact_tags at ON at.tag_id = t.id
             WHERE at.artifact_id = ?1 ORDER BY t.tag",
        )?;

        let rows = stmt.query_map(params![artifact_id], |row| row.get(0))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Properties

    fn add_fileset_property(&self, fileset_id: i64, name: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO properties (name, value) VALUES (?1, ?2)",
            params![name, value],
        )?;
        let property_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO fileset_properties (fileset_id, property_id) VALUES (?1, ?2)",
            params![fileset_id, property_id],
        )?;
        Ok(())
    }

    fn add_artifact_property(&self, artifact_id: i64, name: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO properties (name, value) VALUES (?1, ?2)",
            params![name, value],
        )?;
        let property_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO artifact_properties (artifact_id, property_id) VALUES (?1, ?2)",
            params![artifact_id, property_id],
        )?;
        Ok(())
    }

    fn fileset_property(&self, fileset_id: i64, name: &str) -> Result<Option<Property>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT p.id, p.name, p.value FROM properties p
             JOIN fileset_properties fp ON fp.property_id = p.id
             WHERE fp.fileset_id = ?1 AND p.name = ?2",
            params![fileset_id, name],
            |row| {
                Ok(Property {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    value: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn artifact_property(&self, artifact_id: i64, name: &str) -> Result<Option<Property>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT p.id, p.name, p.value FROM properties p
             JOIN artifact_properties ap ON ap.property_id = p.id
             WHERE ap.artifact_id = ?1 AND p.name = ?2",
            params![artifact_id, name],
            |row| {
                Ok(Property {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    value: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn fileset_properties(&self, fileset_id: i64) -> Result<Vec<Property>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT p.id, p.name, p.value FROM properties p
             JOIN fileset_properties fp ON fp.property_id = p.id
             WHERE fp.fileset_id = ?1 ORDER BY p.name",
        )?;

        let rows = stmt.query_map(params![fileset_id], |row| {
            Ok(Property {
                id: row.get(0)?,
                name: row.get(1)?,
                value: row.get(2)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn artifact_properties(&self, artifact_id: i64) -> Result<Vec<Property>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT p.id, p.name, p.value FROM properties p
             JOIN artifact_properties ap ON ap.property_id = p.id
             WHERE ap.artifact_id = ?1 ORDER BY p.name",
        )?;

        let rows = stmt.query_map(params![artifact_id], |row| {
            Ok(Property {
                id: row.get(0)?,
                name: row.get(1)?,
                value: row.get(2)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_property(&self, property_id: i64, value: &str) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE properties SET value = ?1 WHERE id = ?2",
            params![value, property_id],
        )?;

        if rows == 0 {
            return Err(Error::Configuration(format!(
                "property {property_id} does not exist"
            )));
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Capability;

    fn seeded_catalog() -> SqliteCatalog {
        let catalog = SqliteCatalog::open_in_memory().expect("open catalog");
        catalog.initialize().expect("initialize schema");
        catalog
    }

    #[test]
    fn test_duplicate_fileset_name() {
        let catalog = seeded_catalog();
        let repo_id = catalog.create_repo("default", "/tmp/depot", "content-store").unwrap();

        catalog.create_fileset("build-1", "1.0", "abc", repo_id).unwrap();
        let err = catalog
            .create_fileset("build-1", "1.1", "def", repo_id)
            .unwrap_err();
        assert!(matches!(err, Error::FilesetExists(name) if name == "build-1"));
    }

    #[test]
    fn test_user_capability_ids() {
        let catalog = seeded_catalog();
        for cap in Capability::ALL {
            catalog
                .create_capability(&CapabilityRow {
                    id: cap.id(),
                    name: cap.name().to_string(),
                    description: cap.description().to_string(),
                })
                .unwrap();
        }
        catalog
            .create_user(&User {
                uid: 1046,
                name: "db".to_string(),
            })
            .unwrap();
        catalog.grant_capability(1046, Capability::AddFileset.id()).unwrap();
        catalog.grant_capability(1046, Capability::AddArtifact.id()).unwrap();

        let granted = catalog.user_capability_ids(1046).unwrap();
        assert_eq!(granted.len(), 2);
        assert!(granted.contains(&Capability::AddFileset.id()));
        assert!(!granted.contains(&Capability::GetArtifact.id()));

        assert!(catalog.user_capability_ids(9999).unwrap().is_empty());
    }

    #[test]
    fn test_tag_rows_are_shared() {
        let catalog = seeded_catalog();
        let first = catalog.get_or_create_tag("RC1").unwrap();
        let second = catalog.get_or_create_tag("RC1").unwrap();
        assert_eq!(first, second);
    }
}
