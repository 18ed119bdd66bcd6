use crate::error::{Error, Result};
use crate::perm::PermissionAuthority;
use crate::store::Catalog;
use crate::types::Artifact;

/// Everything a validation hook may inspect while deciding on a transition.
pub struct HookContext<'a> {
    pub uid: i64,
    pub authority: &'a PermissionAuthority<'a>,
    pub catalog: &'a dyn Catalog,
    pub artifact: &'a Artifact,
    pub old_state: &'a str,
    pub new_state: &'a str,
    /// Opaque strings attached to the transition record.
    pub data: &'a [String],
}

/// A named validator attached to a transition. Hooks are pure checks: they
/// never mutate the catalog or the content store.
pub trait TransitionHook: Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, ctx: &HookContext<'_>) -> Result<()>;
}

/// Requires a non-primary artifact in the same fileset for every `file:`
/// entry in the hook data, matched by file-name suffix. Used to demand a
/// test report before an artifact may leave the testing state.
struct AuxFilePresent;

impl TransitionHook for AuxFilePresent {
    fn name(&self) -> &'static str {
        "aux_file_present"
    }

    fn validate(&self, ctx: &HookContext<'_>) -> Result<()> {
        let auxiliaries = ctx.catalog.fileset_auxiliaries(ctx.artifact.fileset_id)?;

        let mut missing: Vec<&str> = ctx
            .data
            .iter()
            .filter_map(|entry| entry.strip_prefix("file:"))
            .collect();
        missing.retain(|suffix| !auxiliaries.iter().any(|aux| aux.name.ends_with(suffix)));

        if missing.is_empty() {
            return Ok(());
        }
        Err(Error::Validation(format!(
            "fileset {} has no auxiliary file matching '{}'",
            ctx.artifact.fileset_id,
            missing.join("', '")
        )))
    }
}

static REGISTRY: &[&dyn TransitionHook] = &[&AuxFilePresent];

/// Looks a hook up by its persisted name. Hooks are fixed at compile time;
/// an unresolved name is a configuration error at state machine build time.
pub fn resolve(name: &str) -> Option<&'static dyn TransitionHook> {
    REGISTRY.iter().copied().find(|hook| hook.name() == name)
}
