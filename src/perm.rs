use crate::error::{Error, Result};
use crate::store::Catalog;
use crate::types::Capability;

/// Read-only capability checks against the catalog's grant records.
///
/// Checks are queried on demand; repeated checks within one operation are
/// expected. Denial is a typed `PermissionDenied` that no caller wraps.
pub struct PermissionAuthority<'a> {
    catalog: &'a dyn Catalog,
}

impl<'a> PermissionAuthority<'a> {
    pub fn new(catalog: &'a dyn Catalog) -> Self {
        Self { catalog }
    }

    /// Fails with `PermissionDenied` unless `uid` holds `capability`.
    pub fn check(&self, uid: i64, capability: Capability) -> Result<()> {
        self.check_id(uid, capability.id())
    }

    /// Same as `check`, keyed by a persisted capability id (as stored on
    /// transition records).
    pub fn check_id(&self, uid: i64, capability_id: i64) -> Result<()> {
        let granted = self.catalog.user_capability_ids(uid)?;
        if granted.contains(&capability_id) {
            return Ok(());
        }
        Err(Error::PermissionDenied {
            uid,
            capability: Capability::from_id(capability_id)
                .map_or_else(|| capability_id.to_string(), |c| c.name().to_string()),
        })
    }
}
