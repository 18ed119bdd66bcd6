pub const SCHEMA: &str = r#"
-- Where artifact bytes live; exactly one row per depot
CREATE TABLE IF NOT EXISTS repos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    kind TEXT NOT NULL
);

-- Lifecycle states
CREATE TABLE IF NOT EXISTS states (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

-- The fixed capability catalog; ids are assigned by the seeder, not SQLite
CREATE TABLE IF NOT EXISTS capabilities (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    uid INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

-- Capability grants per user
CREATE TABLE IF NOT EXISTS user_capabilities (
    user_id INTEGER NOT NULL REFERENCES users(uid) ON DELETE CASCADE,
    capability_id INTEGER NOT NULL REFERENCES capabilities(id) ON DELETE CASCADE,
    PRIMARY KEY (user_id, capability_id)
);

-- The lifecycle graph: one row per allowed edge
CREATE TABLE IF NOT EXISTS transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_id INTEGER NOT NULL REFERENCES states(id),
    end_id INTEGER NOT NULL REFERENCES states(id),
    capability_id INTEGER NOT NULL REFERENCES capabilities(id),
    hook_name TEXT,

    UNIQUE (start_id, end_id),
    CHECK (start_id <> end_id)
);

-- Opaque strings handed to a transition's validation hook
CREATE TABLE IF NOT EXISTS hook_data (
    transition_id INTEGER NOT NULL REFERENCES transitions(id) ON DELETE CASCADE,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS filesets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    version TEXT NOT NULL,
    revision TEXT NOT NULL,
    repo_id INTEGER NOT NULL REFERENCES repos(id)
);

CREATE TABLE IF NOT EXISTS artifacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fileset_id INTEGER NOT NULL REFERENCES filesets(id),
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    is_primary INTEGER NOT NULL,
    state_id INTEGER NOT NULL REFERENCES states(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    source TEXT NOT NULL,
    checksum TEXT NOT NULL,
    compression TEXT,

    UNIQUE (name, path),
    UNIQUE (fileset_id, name)
);

-- Tags are shared labels (many-to-many with filesets and artifacts)
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS fileset_tags (
    fileset_id INTEGER NOT NULL REFERENCES filesets(id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (fileset_id, tag_id)
);

CREATE TABLE IF NOT EXISTS artifact_tags (
    artifact_id INTEGER NOT NULL REFERENCES artifacts(id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (artifact_id, tag_id)
);

-- Properties are per-owner key/value rows, associated like tags
CREATE TABLE IF NOT EXISTS properties (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fileset_properties (
    fileset_id INTEGER NOT NULL REFERENCES filesets(id) ON DELETE CASCADE,
    property_id INTEGER NOT NULL REFERENCES properties(id) ON DELETE CASCADE,
    PRIMARY KEY (fileset_id, property_id)
);

CREATE TABLE IF NOT EXISTS artifact_properties (
    artifact_id INTEGER NOT NULL REFERENCES artifacts(id) ON DELETE CASCADE,
    property_id INTEGER NOT NULL REFERENCES properties(id) ON DELETE CASCADE,
    PRIMARY KEY (artifact_id, property_id)
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_artifacts_fileset ON artifacts(fileset_id);
CREATE INDEX IF NOT EXISTS idx_transitions_start ON transitions(start_id);
CREATE INDEX IF NOT EXISTS idx_user_capabilities_user ON user_capabilities(user_id);
CREATE INDEX IF NOT EXISTS idx_hook_data_transition ON hook_data(transition_id);
CREATE INDEX IF NOT EXISTS idx_fileset_properties_fileset ON fileset_properties(fileset_id);
CREATE INDEX IF NOT EXISTS idx_artifact_properties_artifact ON artifact_properties(artifact_id);
"#;
