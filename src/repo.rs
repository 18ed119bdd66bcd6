use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::DepotConfig;
use crate::content::{ContentStore, OpenMode};
use crate::error::{Error, Result};
use crate::lifecycle::StateMachine;
use crate::lock::LockMarker;
use crate::perm::PermissionAuthority;
use crate::store::{Catalog, SqliteCatalog};
use crate::types::*;

const REPO_KIND: &str = "content-store";

const STATE_NAMES: [&str; 6] = [
    "untested",
    "testing",
    "tested",
    "approved",
    "released",
    "withdrawn",
];

/// The seeded lifecycle graph: (start, end, capability, hook with data).
#[rustfmt::skip]
const TRANSITIONS: [(&str, &str, Capability, Option<(&str, &[&str])>); 8] = [
    ("untested", "testing",   Capability::BeginTesting,     None),
    ("untested", "withdrawn", Capability::WithdrawArtifact, None),
    ("testing",  "tested",    Capability::ArtifactTested,   Some(("aux_file_present", &["file:test_report"]))),
    ("testing",  "withdrawn", Capability::WithdrawArtifact, None),
    ("tested",   "approved",  Capability::ApproveArtifact,  None),
    ("tested",   "withdrawn", Capability::WithdrawArtifact, None),
    ("approved", "released",  Capability::ReleaseArtifact,  None),
    ("approved", "withdrawn", Capability::WithdrawArtifact, None),
];

const CHECKSUM_CHUNK: usize = 128 * 1024;

/// Depot is the coordinator over the catalog, the content store and the
/// lifecycle state machine. Exactly one process may hold an open depot;
/// exclusivity is enforced by the lock marker, not by the OS.
pub struct Depot {
    config: DepotConfig,
    catalog: Box<dyn Catalog>,
    content: ContentStore,
    machine: StateMachine,
    repo: Repo,
    lock: Option<LockMarker>,
}

impl std::fmt::Debug for Depot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Depot")
            .field("config", &self.config)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl Depot {
    /// Creates a new depot at `root` and seeds the catalog: the repo
    /// record, the lifecycle graph, the capability table and the owning
    /// user with every capability granted.
    pub fn init<P: AsRef<Path>>(root: P, owner_uid: i64, owner_name: &str) -> Result<()> {
        let root = root.as_ref();
        if root.exists() {
            return Err(Error::AlreadyExists);
        }
        fs::create_dir_all(root)?;

        let config = DepotConfig::new(root);
        let catalog = SqliteCatalog::new(config.db_path())?;
        catalog.initialize()?;

        catalog.begin()?;
        match seed_catalog(&catalog, root, owner_uid, owner_name) {
            Ok(()) => catalog.commit()?,
            Err(e) => {
                let _ = catalog.rollback();
                return Err(e);
            }
        }

        info!(root = %root.display(), owner = owner_name, "initialised depot");
        Ok(())
    }

    /// Opens an initialised depot, taking the exclusive lock marker.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Depot> {
        let config = DepotConfig::new(root.as_ref());
        if !config.db_path().exists() {
            return Err(Error::Configuration("depot instance not found".to_string()));
        }

        let lock = LockMarker::acquire(&config.lock_path())?;
        let catalog = SqliteCatalog::new(config.db_path())?;

        let mut repos = catalog.list_repos()?;
        if repos.len() != 1 {
            return Err(Error::Configuration(
                "exactly one repo record expected".to_string(),
            ));
        }
        let repo = repos.remove(0);
        if repo.kind != REPO_KIND {
            return Err(Error::Configuration(format!(
                "unsupported repo kind '{}'",
                repo.kind
            )));
        }

        let machine = StateMachine::from_catalog(&catalog)?;
        let content = ContentStore::new(&repo.path);

        info!(root = %config.root().display(), "opened depot");
        Ok(Depot {
            config,
            catalog: Box::new(catalog),
            content,
            machine,
            repo,
            lock: Some(lock),
        })
    }

    /// Releases the lock marker and closes the catalog. Dropping a depot
    /// without calling this still removes the marker, best effort.
    pub fn close(mut self) -> Result<()> {
        self.catalog.close()?;
        if let Some(lock) = self.lock.take() {
            lock.release()?;
        }
        info!(root = %self.config.root().display(), "closed depot");
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &DepotConfig {
        &self.config
    }

    #[must_use]
    pub fn state_name(&self, state_id: i64) -> Option<&str> {
        self.machine.state_name(state_id)
    }

    fn authority(&self) -> PermissionAuthority<'_> {
        PermissionAuthority::new(self.catalog.as_ref())
    }

    // Filesets

    pub fn add_fileset(
        &self,
        uid: i64,
        name: &str,
        version: &str,
        revision: &str,
    ) -> Result<Fileset> {
        self.authority().check(uid, Capability::AddFileset)?;

        self.catalog.begin()?;
        match self
            .catalog
            .create_fileset(name, version, revision, self.repo.id)
        {
            Ok(fileset) => {
                self.catalog.commit()?;
                info!(fileset = name, "added fileset");
                Ok(fileset)
            }
            Err(e) => {
                let _ = self.catalog.rollback();
                Err(e)
            }
        }
    }

    pub fn list_filesets(&self, uid: i64, range: &ListRange) -> Result<Vec<Fileset>> {
        self.authority().check(uid, Capability::ListFilesets)?;
        self.catalog.list_filesets(range)
    }

    pub fn find_fileset(&self, uid: i64, name: &str) -> Result<Option<Fileset>> {
        self.authority().check(uid, Capability::ListFilesets)?;
        self.catalog.fileset_by_name(name)
    }

    // Artifacts

    /// Ingests one artifact: checksum the source, stage the catalog row,
    /// copy the bytes into the content store, then commit. The copy runs
    /// before the commit so that a filesystem failure rolls back to a
    /// consistent catalog.
    pub fn add_artifact(
        &self,
        uid: i64,
        spec: &ArtifactSpec,
        source_file: &Path,
    ) -> Result<Artifact> {
        self.authority().check(uid, Capability::AddArtifact)?;

        self.catalog
            .get_fileset(spec.fileset_id)?
            .ok_or(Error::FilesetNotFound(spec.fileset_id))?;

        let mut source = open_source(source_file)?;
        let checksum = checksum_stream(&mut source)?;
        source.seek(SeekFrom::Start(0))?;

        let now = Utc::now();
        let mut artifact = Artifact {
            id: 0,
            fileset_id: spec.fileset_id,
            name: spec.name.clone(),
            path: spec.path.clone(),
            is_primary: spec.is_primary,
            state_id: self.machine.start_state_id(),
            created_at: now,
            updated_at: now,
            source: spec.source.clone(),
            checksum,
            compression: None,
        };

        self.catalog.begin()?;
        match self.ingest(&artifact, &mut source) {
            Ok(id) => {
                self.catalog.commit()?;
                artifact.id = id;
                info!(
                    artifact = %format!("{}/{}", artifact.path, artifact.name),
                    id,
                    "added artifact"
                );
                Ok(artifact)
            }
            Err(e) => {
                let _ = self.catalog.rollback();
                Err(e)
            }
        }
    }

    fn ingest(&self, artifact: &Artifact, source: &mut File) -> Result<i64> {
        let id = self.catalog.insert_artifact(artifact)?;

        let rel_path = format!("{}/{}", artifact.path, artifact.name);
        let mut sink = self.content.open(&rel_path, OpenMode::Write)?;
        io::copy(source, &mut sink)?;
        sink.close()?;

        Ok(id)
    }

    pub fn list_artifacts(&self, uid: i64, range: &ListRange) -> Result<Vec<Artifact>> {
        self.authority().check(uid, Capability::ListArtifacts)?;
        self.catalog.list_artifacts(range)
    }

    pub fn get_artifact_record(&self, uid: i64, artifact_id: i64) -> Result<Artifact> {
        self.authority().check(uid, Capability::ListArtifacts)?;
        self.catalog
            .get_artifact(artifact_id)?
            .ok_or(Error::ArtifactNotFound(artifact_id))
    }

    /// Copies an artifact's bytes out of the content store. Never
    /// overwrites: an existing destination fails without being touched.
    pub fn get_artifact(&self, uid: i64, artifact_id: i64, destination: &Path) -> Result<()> {
        self.authority().check(uid, Capability::GetArtifact)?;

        let artifact = self
            .catalog
            .get_artifact(artifact_id)?
            .ok_or(Error::ArtifactNotFound(artifact_id))?;

        let mut sink = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::DestinationExists(destination.to_path_buf()));
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied || e.kind() == ErrorKind::NotFound => {
                return Err(Error::CannotWriteDestination(destination.to_path_buf()));
            }
            Err(e) => return Err(Error::from(e)),
        };

        let rel_path = format!("{}/{}", artifact.path, artifact.name);
        let mut source = self.content.open(&rel_path, OpenMode::Read)?;
        io::copy(&mut source, &mut sink)?;

        debug!(artifact = artifact_id, dest = %destination.display(), "retrieved artifact");
        Ok(())
    }

    /// Moves a primary artifact to `requested_state` through the state
    /// machine, persisting the new state and update timestamp on success.
    pub fn transit_artifact(
        &self,
        uid: i64,
        artifact_id: i64,
        requested_state: &str,
    ) -> Result<Artifact> {
        if !self.machine.is_known_state(requested_state) {
            return Err(Error::InvalidState(requested_state.to_string()));
        }

        let artifact = self
            .catalog
            .get_artifact(artifact_id)?
            .ok_or(Error::ArtifactNotFound(artifact_id))?;
        if !artifact.is_primary {
            return Err(Error::InvalidTargetForStateChange);
        }

        let old_state = self
            .machine
            .state_name(artifact.state_id)
            .ok_or_else(|| Error::UnknownState(format!("state id {}", artifact.state_id)))?
            .to_string();

        let authority = self.authority();
        let new_state_id = self.machine.transit(
            uid,
            &authority,
            self.catalog.as_ref(),
            &artifact,
            &old_state,
            requested_state,
        )?;

        let now = Utc::now();
        self.catalog.begin()?;
        match self
            .catalog
            .update_artifact_state(artifact_id, new_state_id, &now)
        {
            Ok(()) => {
                self.catalog.commit()?;
                info!(
                    artifact = artifact_id,
                    from = %old_state,
                    to = %requested_state,
                    "transitioned artifact"
                );
                self.catalog
                    .get_artifact(artifact_id)?
                    .ok_or(Error::ArtifactNotFound(artifact_id))
            }
            Err(e) => {
                let _ = self.catalog.rollback();
                Err(e)
            }
        }
    }

    // Tags

    pub fn tag_fileset(&self, uid: i64, fileset_id: i64, tag: &str) -> Result<()> {
        self.authority().check(uid, Capability::TagFileset)?;
        self.catalog
            .get_fileset(fileset_id)?
            .ok_or(Error::FilesetNotFound(fileset_id))?;

        self.catalog.begin()?;
        match self.attach_tag(tag, |tag_id| {
            self.catalog.attach_fileset_tag(fileset_id, tag_id)
        }) {
            Ok(()) => self.catalog.commit(),
            Err(e) => {
                let _ = self.catalog.rollback();
                Err(e)
            }
        }
    }

    pub fn tag_artifact(&self, uid: i64, artifact_id: i64, tag: &str) -> Result<()> {
        self.authority().check(uid, Capability::TagArtifact)?;
        self.catalog
            .get_artifact(artifact_id)?
            .ok_or(Error::ArtifactNotFound(artifact_id))?;

        self.catalog.begin()?;
        match self.attach_tag(tag, |tag_id| {
            self.catalog.attach_artifact_tag(artifact_id, tag_id)
        }) {
            Ok(()) => self.catalog.commit(),
            Err(e) => {
                let _ = self.catalog.rollback();
                Err(e)
            }
        }
    }

    fn attach_tag<F>(&self, tag: &str, attach: F) -> Result<()>
    where
        F: FnOnce(i64) -> Result<()>,
    {
        let tag_id = self.catalog.get_or_create_tag(tag)?;
        attach(tag_id)
    }

    pub fn fileset_tags(&self, fileset_id: i64) -> Result<Vec<String>> {
        self.catalog.fileset_tags(fileset_id)
    }

    pub fn artifact_tags(&self, artifact_id: i64) -> Result<Vec<String>> {
        self.catalog.artifact_tags(artifact_id)
    }

    // Properties

    pub fn set_fileset_property(
        &self,
        uid: i64,
        fileset_id: i64,
        name: &str,
        value: &str,
        update: bool,
    ) -> Result<()> {
        let capability = if update {
            Capability::UpdateFilesetProperty
        } else {
            Capability::AddFilesetProperty
        };
        self.authority().check(uid, capability)?;
        self.catalog
            .get_fileset(fileset_id)?
            .ok_or(Error::FilesetNotFound(fileset_id))?;

        self.catalog.begin()?;
        let existing = match self.catalog.fileset_property(fileset_id, name) {
            Ok(existing) => existing,
            Err(e) => {
                let _ = self.catalog.rollback();
                return Err(e);
            }
        };
        let result = match existing {
            Some(property) if update => self.catalog.update_property(property.id, value),
            Some(_) => Err(Error::PropertyExists(name.to_string())),
            None => self.catalog.add_fileset_property(fileset_id, name, value),
        };
        match result {
            Ok(()) => self.catalog.commit(),
            Err(e) => {
                let _ = self.catalog.rollback();
                Err(e)
            }
        }
    }

    pub fn set_artifact_property(
        &self,
        uid: i64,
        artifact_id: i64,
        name: &str,
        value: &str,
        update: bool,
    ) -> Result<()> {
        let capability = if update {
            Capability::UpdateArtifactProperty
        } else {
            Capability::AddArtifactProperty
        };
        self.authority().check(uid, capability)?;
        self.catalog
            .get_artifact(artifact_id)?
            .ok_or(Error::ArtifactNotFound(artifact_id))?;

        self.catalog.begin()?;
        let existing = match self.catalog.artifact_property(artifact_id, name) {
            Ok(existing) => existing,
            Err(e) => {
                let _ = self.catalog.rollback();
                return Err(e);
            }
        };
        let result = match existing {
            Some(property) if update => self.catalog.update_property(property.id, value),
            Some(_) => Err(Error::PropertyExists(name.to_string())),
            None => self.catalog.add_artifact_property(artifact_id, name, value),
        };
        match result {
            Ok(()) => self.catalog.commit(),
            Err(e) => {
                let _ = self.catalog.rollback();
                Err(e)
            }
        }
    }

    pub fn fileset_properties(&self, fileset_id: i64) -> Result<Vec<Property>> {
        self.catalog.fileset_properties(fileset_id)
    }

    pub fn artifact_properties(&self, artifact_id: i64) -> Result<Vec<Property>> {
        self.catalog.artifact_properties(artifact_id)
    }
}

fn seed_catalog(
    catalog: &dyn Catalog,
    root: &Path,
    owner_uid: i64,
    owner_name: &str,
) -> Result<()> {
    catalog.create_repo("default", &root.display().to_string(), REPO_KIND)?;

    let mut state_ids = std::collections::HashMap::new();
    for name in STATE_NAMES {
        state_ids.insert(name, catalog.create_state(name)?);
    }

    for cap in Capability::ALL {
        catalog.create_capability(&CapabilityRow {
            id: cap.id(),
            name: cap.name().to_string(),
            description: cap.description().to_string(),
        })?;
    }

    for (start, end, capability, hook) in TRANSITIONS {
        let transition_id = catalog.create_transition(
            state_ids[start],
            state_ids[end],
            capability.id(),
            hook.map(|(name, _)| name),
        )?;
        if let Some((_, data)) = hook {
            for &value in data {
                catalog.add_hook_data(transition_id, value)?;
            }
        }
    }

    catalog.create_user(&User {
        uid: owner_uid,
        name: owner_name.to_string(),
    })?;
    for cap in Capability::ALL {
        catalog.grant_capability(owner_uid, cap.id())?;
    }

    Ok(())
}

fn open_source(path: &Path) -> Result<File> {
    match File::open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::SourceNotFound(path.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            Err(Error::SourcePermissionDenied(path.to_path_buf()))
        }
        Err(e) => Err(Error::from(e)),
    }
}

/// Streams the source once through SHA-256, returning `sha256:<hex>`.
fn checksum_stream<R: Read>(source: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHECKSUM_CHUNK];
    loop {
        let n = source.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}
