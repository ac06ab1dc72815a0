//! Destination schema provisioning

use tracing::{info, warn};

use crate::store::StoreSession;

/// Create `schema` if absent
///
/// Never fails: a role may hold insert privileges on a pre-provisioned schema
/// without being allowed to create one, so an error is logged and the load
/// continues. Returns whether the statement succeeded.
pub async fn ensure_schema(session: &mut dyn StoreSession, schema: &str) -> bool {
    match session.create_schema(schema).await {
        Ok(()) => {
            info!("Schema '{}' created or already exists", schema);
            true
        },
        Err(e) => {
            warn!("Could not create schema '{}': {}", schema, e);
            false
        },
    }
}
