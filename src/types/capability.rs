use std::fmt;

use serde::{Deserialize, Serialize};

/// Capability is one named permission with a stable integer identity.
///
/// The full set is fixed at compile time and seeded into the catalog when a
/// depot is initialised; transition records reference these ids, so the
/// discriminants must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i64)]
pub enum Capability {
    AddFileset = 1,
    AddArtifact = 2,
    ListFilesets = 3,
    ListArtifacts = 4,
    BeginTesting = 5,
    WithdrawArtifact = 6,
    ArtifactTested = 7,
    ApproveArtifact = 8,
    ReleaseArtifact = 9,
    GetArtifact = 10,
    TagFileset = 11,
    AddFilesetProperty = 12,
    UpdateFilesetProperty = 13,
    TagArtifact = 14,
    AddArtifactProperty = 15,
    UpdateArtifactProperty = 16,
}

impl Capability {
    pub const ALL: [Capability; 16] = [
        Capability::AddFileset,
        Capability::AddArtifact,
        Capability::ListFilesets,
        Capability::ListArtifacts,
        Capability::BeginTesting,
        Capability::WithdrawArtifact,
        Capability::ArtifactTested,
        Capability::ApproveArtifact,
        Capability::ReleaseArtifact,
        Capability::GetArtifact,
        Capability::TagFileset,
        Capability::AddFilesetProperty,
        Capability::UpdateFilesetProperty,
        Capability::TagArtifact,
        Capability::AddArtifactProperty,
        Capability::UpdateArtifactProperty,
    ];

    #[must_use]
    pub const fn id(self) -> i64 {
        self as i64
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Capability::AddFileset => "ADD_FILESET",
            Capability::AddArtifact => "ADD_ARTIFACT",
            Capability::ListFilesets => "LIST_FILESETS",
            Capability::ListArtifacts => "LIST_ARTIFACTS",
            Capability::BeginTesting => "BEGIN_TESTING",
            Capability::WithdrawArtifact => "WITHDRAW_ARTIFACT",
            Capability::ArtifactTested => "ARTIFACT_TESTED",
            Capability::ApproveArtifact => "APPROVE_ARTIFACT",
            Capability::ReleaseArtifact => "RELEASE_ARTIFACT",
            Capability::GetArtifact => "GET_ARTIFACT",
            Capability::TagFileset => "TAG_FILESET",
            Capability::AddFilesetProperty => "ADD_FILESET_PROPERTY",
            Capability::UpdateFilesetProperty => "UPDATE_FILESET_PROPERTY",
            Capability::TagArtifact => "TAG_ARTIFACT",
            Capability::AddArtifactProperty => "ADD_ARTIFACT_PROPERTY",
            Capability::UpdateArtifactProperty => "UPDATE_ARTIFACT_PROPERTY",
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Capability::AddFileset => "Create a new fileset",
            Capability::AddArtifact => "Upload a new artifact into a fileset",
            Capability::ListFilesets => "List all filesets",
            Capability::ListArtifacts => "List artifacts across all filesets",
            Capability::BeginTesting => "Move an artifact into the testing state",
            Capability::WithdrawArtifact => "Withdraw an artifact",
            Capability::ArtifactTested => "Mark testing as completed",
            Capability::ApproveArtifact => "Mark an artifact as approved",
            Capability::ReleaseArtifact => "Release an artifact",
            Capability::GetArtifact => "Retrieve artifact contents",
            Capability::TagFileset => "Attach tags to a fileset",
            Capability::AddFilesetProperty => "Attach a property to a fileset",
            Capability::UpdateFilesetProperty => "Rewrite an existing fileset property",
            Capability::TagArtifact => "Attach tags to an artifact",
            Capability::AddArtifactProperty => "Attach a property to an artifact",
            Capability::UpdateArtifactProperty => "Rewrite an existing artifact property",
        }
    }

    /// Converts a capability name back to its value.
    pub fn parse(s: &str) -> Option<Capability> {
        Capability::ALL.iter().copied().find(|c| c.name() == s)
    }

    /// Converts a persisted capability id back to its value.
    pub fn from_id(id: i64) -> Option<Capability> {
        Capability::ALL.iter().copied().find(|c| c.id() == id)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_stable() {
        assert_eq!(Capability::AddFileset.id(), 1);
        assert_eq!(Capability::AddArtifact.id(), 2);
        assert_eq!(Capability::ListFilesets.id(), 3);
        assert_eq!(Capability::ListArtifacts.id(), 4);
        assert_eq!(Capability::BeginTesting.id(), 5);
        assert_eq!(Capability::WithdrawArtifact.id(), 6);
        assert_eq!(Capability::ArtifactTested.id(), 7);
        assert_eq!(Capability::ApproveArtifact.id(), 8);
        assert_eq!(Capability::ReleaseArtifact.id(), 9);
        assert_eq!(Capability::GetArtifact.id(), 10);
        assert_eq!(Capability::TagFileset.id(), 11);
        assert_eq!(Capability::AddFilesetProperty.id(), 12);
        assert_eq!(Capability::UpdateFilesetProperty.id(), 13);
        assert_eq!(Capability::TagArtifact.id(), 14);
        assert_eq!(Capability::AddArtifactProperty.id(), 15);
        assert_eq!(Capability::UpdateArtifactProperty.id(), 16);
    }

    #[test]
    fn test_parse_capability() {
        assert_eq!(
            Capability::parse("BEGIN_TESTING"),
            Some(Capability::BeginTesting)
        );
        assert_eq!(Capability::parse("ARCHIVE_FILESET"), None);
    }

    #[test]
    fn test_from_id_round_trip() {
        for cap in Capability::ALL {
            assert_eq!(Capability::from_id(cap.id()), Some(cap));
        }
        assert_eq!(Capability::from_id(0), None);
        assert_eq!(Capability::from_id(17), None);
    }
}
