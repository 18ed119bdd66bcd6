use std::collections::{BTreeSet, HashMap};

use super::hooks::{self, HookContext, TransitionHook};
use crate::error::{Error, Result};
use crate::perm::PermissionAuthority;
use crate::store::Catalog;
use crate::types::Artifact;

struct TransitionRule {
    capability_id: i64,
    hook: Option<&'static dyn TransitionHook>,
    hook_data: Vec<String>,
}

/// The lifecycle graph, built once per opened depot from the persisted
/// state and transition records. The machine itself holds no mutable
/// state; each `transit` call is an independent check.
pub struct StateMachine {
    state_ids: HashMap<String, i64>,
    state_names: HashMap<i64, String>,
    transitions: HashMap<String, HashMap<String, TransitionRule>>,
    start_state: String,
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("state_ids", &self.state_ids)
            .field("state_names", &self.state_names)
            .field("start_state", &self.start_state)
            .finish_non_exhaustive()
    }
}

impl StateMachine {
    /// Builds the machine from catalog records.
    ///
    /// Fails with `Configuration` on an unknown hook name, a transition
    /// referencing an unknown state, or a graph without exactly one state
    /// that is never the end of a transition (the single entry point).
    pub fn from_catalog(catalog: &dyn Catalog) -> Result<Self> {
        let states = catalog.list_states()?;

        let mut state_ids = HashMap::new();
        let mut state_names = HashMap::new();
        let mut transitions: HashMap<String, HashMap<String, TransitionRule>> = HashMap::new();
        let mut never_entered: BTreeSet<String> = BTreeSet::new();
        for state in &states {
            state_ids.insert(state.name.clone(), state.id);
            state_names.insert(state.id, state.name.clone());
            transitions.insert(state.name.clone(), HashMap::new());
            never_entered.insert(state.name.clone());
        }

        for record in catalog.list_transitions()? {
            let start = state_names.get(&record.start_id).ok_or_else(|| {
                Error::Configuration(format!("transition references unknown state id {}", record.start_id))
            })?;
            let end = state_names.get(&record.end_id).ok_or_else(|| {
                Error::Configuration(format!("transition references unknown state id {}", record.end_id))
            })?;

            let hook = match record.hook_name.as_deref() {
                Some(name) => Some(hooks::resolve(name).ok_or_else(|| {
                    Error::Configuration(format!("unknown transition hook '{name}'"))
                })?),
                None => None,
            };
            let hook_data = if hook.is_some() {
                catalog.hook_data(record.id)?
            } else {
                Vec::new()
            };

            transitions.entry(start.clone()).or_default().insert(
                end.clone(),
                TransitionRule {
                    capability_id: record.capability_id,
                    hook,
                    hook_data,
                },
            );
            never_entered.remove(end);
        }

        if never_entered.len() != 1 {
            return Err(Error::Configuration(format!(
                "expected exactly one start state, found {}",
                never_entered.len()
            )));
        }
        let start_state = never_entered
            .into_iter()
            .next()
            .expect("length checked above");

        Ok(Self {
            state_ids,
            state_names,
            transitions,
            start_state,
        })
    }

    #[must_use]
    pub fn start_state(&self) -> &str {
        &self.start_state
    }

    #[must_use]
    pub fn start_state_id(&self) -> i64 {
        self.state_ids[&self.start_state]
    }

    #[must_use]
    pub fn is_known_state(&self, name: &str) -> bool {
        self.state_ids.contains_key(name)
    }

    #[must_use]
    pub fn state_id(&self, name: &str) -> Option<i64> {
        self.state_ids.get(name).copied()
    }

    #[must_use]
    pub fn state_name(&self, id: i64) -> Option<&str> {
        self.state_names.get(&id).map(String::as_str)
    }

    /// Checks one lifecycle step and returns the id of the new state.
    ///
    /// The permission check always runs before the validation hook, so a
    /// caller lacking the transition capability sees `PermissionDenied`
    /// even when the hook would also have rejected. The caller persists
    /// the returned state id together with a fresh update timestamp.
    pub fn transit(
        &self,
        uid: i64,
        authority: &PermissionAuthority<'_>,
        catalog: &dyn Catalog,
        artifact: &Artifact,
        old_state: &str,
        new_state: &str,
    ) -> Result<i64> {
        let valid = self
            .transitions
            .get(old_state)
            .ok_or_else(|| Error::UnknownState(old_state.to_string()))?;
        let rule = valid.get(new_state).ok_or_else(|| Error::InvalidTransition {
            from: old_state.to_string(),
            to: new_state.to_string(),
        })?;

        authority.check_id(uid, rule.capability_id)?;

        if let Some(hook) = rule.hook {
            let ctx = HookContext {
                uid,
                authority,
                catalog,
                artifact,
                old_state,
                new_state,
                data: &rule.hook_data,
            };
            hook.validate(&ctx)
                .map_err(|e| wrap_hook_error(old_state, new_state, e))?;
        }

        self.state_ids
            .get(new_state)
            .copied()
            .ok_or_else(|| Error::UnknownState(new_state.to_string()))
    }
}

/// A `PermissionDenied` raised inside a hook passes through unwrapped;
/// every other hook failure becomes the cause of a `CannotTransition`.
fn wrap_hook_error(from: &str, to: &str, error: Error) -> Error {
    match error {
        Error::PermissionDenied { .. } => error,
        other => Error::CannotTransition {
            from: from.to_string(),
            to: to.to_string(),
            source: Box::new(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteCatalog;
    use crate::types::{Capability, CapabilityRow, User};
    use chrono::Utc;

    fn empty_catalog() -> SqliteCatalog {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.initialize().unwrap();
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
    }

    fn test_artifact(fileset_id: i64, state_id: i64) -> Artifact {
        let now = Utc::now();
        Artifact {
            id: 1,
            fileset_id,
            name: "requirements.txt".to_string(),
            path: "deploy".to_string(),
            is_primary: true,
            state_id,
            created_at: now,
            updated_at: now,
            source: "buildbot".to_string(),
            checksum: "sha256:00".to_string(),
            compression: None,
        }
    }

    #[test]
    fn test_single_start_state_accepted() {
        let catalog = empty_catalog();
        let a = catalog.create_state("start").unwrap();
        let b = catalog.create_state("end").unwrap();
        catalog
            .create_transition(a, b, Capability::BeginTesting.id(), None)
            .unwrap();

        let machine = StateMachine::from_catalog(&catalog).unwrap();
        assert_eq!(machine.start_state(), "start");
        assert_eq!(machine.start_state_id(), a);
        assert!(machine.is_known_state("end"));
        assert!(!machine.is_known_state("middle"));
    }

    #[test]
    fn test_two_start_states_rejected() {
        let catalog = empty_catalog();
        let a = catalog.create_state("a").unwrap();
        let b = catalog.create_state("b").unwrap();
        let c = catalog.create_state("c").unwrap();
        let d = catalog.create_state("d").unwrap();
        catalog
            .create_transition(a, b, Capability::BeginTesting.id(), None)
            .unwrap();
        catalog
            .create_transition(c, d, Capability::BeginTesting.id(), None)
            .unwrap();

        let err = StateMachine::from_catalog(&catalog).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_cycle_without_entry_point_rejected() {
        let catalog = empty_catalog();
        let a = catalog.create_state("a").unwrap();
        let b = catalog.create_state("b").unwrap();
        catalog
            .create_transition(a, b, Capability::BeginTesting.id(), None)
            .unwrap();
        catalog
            .create_transition(b, a, Capability::BeginTesting.id(), None)
            .unwrap();

        let err = StateMachine::from_catalog(&catalog).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_unknown_hook_name_rejected_at_build_time() {
        let catalog = empty_catalog();
        let a = catalog.create_state("start").unwrap();
        let b = catalog.create_state("end").unwrap();
        catalog
            .create_transition(a, b, Capability::BeginTesting.id(), Some("no_such_hook"))
            .unwrap();

        let err = StateMachine::from_catalog(&catalog).unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("no_such_hook")));
    }

    #[test]
    fn test_transit_unknown_old_state() {
        let catalog = empty_catalog();
        let a = catalog.create_state("start").unwrap();
        let b = catalog.create_state("end").unwrap();
        catalog
            .create_transition(a, b, Capability::BeginTesting.id(), None)
            .unwrap();
        let machine = StateMachine::from_catalog(&catalog).unwrap();

        let authority = PermissionAuthority::new(&catalog);
        let artifact = test_artifact(1, a);
        let err = machine
            .transit(1046, &authority, &catalog, &artifact, "elsewhere", "end")
            .unwrap_err();
        assert!(matches!(err, Error::UnknownState(s) if s == "elsewhere"));
    }

    #[test]
    fn test_transit_missing_edge() {
        let catalog = empty_catalog();
        let a = catalog.create_state("start").unwrap();
        let b = catalog.create_state("middle").unwrap();
        let c = catalog.create_state("end").unwrap();
        catalog
            .create_transition(a, b, Capability::BeginTesting.id(), None)
            .unwrap();
        catalog
            .create_transition(b, c, Capability::BeginTesting.id(), None)
            .unwrap();
        let machine = StateMachine::from_catalog(&catalog).unwrap();

        let authority = PermissionAuthority::new(&catalog);
        let artifact = test_artifact(1, a);
        let err = machine
            .transit(1046, &authority, &catalog, &artifact, "start", "end")
            .unwrap_err();
        assert!(
            matches!(err, Error::InvalidTransition { from, to } if from == "start" && to == "end")
        );
    }

    #[test]
    fn test_permission_checked_before_hook() {
        // The user holds no capabilities and the hook's auxiliary file is
        // also missing; the denial must win over the hook rejection.
        let catalog = empty_catalog();
        let a = catalog.create_state("start").unwrap();
        let b = catalog.create_state("end").unwrap();
        let t = catalog
            .create_transition(a, b, Capability::ArtifactTested.id(), Some("aux_file_present"))
            .unwrap();
        catalog.add_hook_data(t, "file:test_report").unwrap();
        let machine = StateMachine::from_catalog(&catalog).unwrap();

        let authority = PermissionAuthority::new(&catalog);
        let artifact = test_artifact(1, a);
        let err = machine
            .transit(1047, &authority, &catalog, &artifact, "start", "end")
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
    }

    #[test]
    fn test_hook_rejection_is_wrapped() {
        let catalog = empty_catalog();
        catalog
            .create_user(&User {
                uid: 1046,
                name: "db".to_string(),
            })
            .unwrap();
        catalog
            .grant_capability(1046, Capability::ArtifactTested.id())
            .unwrap();

        let a = catalog.create_state("start").unwrap();
        let b = catalog.create_state("end").unwrap();
        let t = catalog
            .create_transition(a, b, Capability::ArtifactTested.id(), Some("aux_file_present"))
            .unwrap();
        catalog.add_hook_data(t, "file:test_report").unwrap();
        let machine = StateMachine::from_catalog(&catalog).unwrap();

        let authority = PermissionAuthority::new(&catalog);
        let artifact = test_artifact(1, a);
        let err = machine
            .transit(1046, &authority, &catalog, &artifact, "start", "end")
            .unwrap_err();
        match err {
            Error::CannotTransition { from, to, source } => {
                assert_eq!(from, "start");
                assert_eq!(to, "end");
                assert!(matches!(*source, Error::Validation(_)));
            }
            other => panic!("expected CannotTransition, got {other:?}"),
        }
    }

    #[test]
    fn test_permission_denied_from_hook_passes_through() {
        let denied = Error::PermissionDenied {
            uid: 1047,
            capability: "ARTIFACT_TESTED".to_string(),
        };
        assert!(matches!(
            wrap_hook_error("start", "end", denied),
            Error::PermissionDenied { .. }
        ));

        let other = Error::Validation("missing report".to_string());
        assert!(matches!(
            wrap_hook_error("start", "end", other),
            Error::CannotTransition { .. }
        ));
    }
}
