//! Group-list refresh.
//!
//! The server's `/groups` response is the authority on which groups exist;
//! the settings store is the authority on which of them are selected.

use tracing::{debug, info};

use crate::api::{AnnotationSource, RemoteGroup};
use crate::error::Result;
use crate::models::Group;
use crate::settings::SettingsStore;

/// Merge the server's groups into the stored list.
///
/// Known ids keep their `selected` flag, new ids start selected, and ids
/// the server no longer returns are dropped. Server order is kept.
pub fn merge_groups(existing: &[Group], remote: &[RemoteGroup]) -> Vec<Group> {
    remote
        .iter()
        .map(|r| Group {
            id: r.id.clone(),
            name: r.name.clone(),
            selected: existing
                .iter()
                .find(|g| g.id == r.id)
                .map(|g| g.selected)
                .unwrap_or(true),
        })
        .collect()
}

/// Fetch `/groups`, merge, and persist. Returns the stored list.
pub async fn refresh_groups(
    source: &dyn AnnotationSource,
    settings: &dyn SettingsStore,
) -> Result<Vec<Group>> {
    let remote = source.fetch_groups().await?;
    let existing = settings.snapshot().groups;
    let merged = merge_groups(&existing, &remote);

    let added = merged
        .iter()
        .filter(|g| !existing.iter().any(|e| e.id == g.id))
        .count();
    let removed = (existing.len() + added).saturating_sub(merged.len());
    if added > 0 || removed > 0 {
        info!("Groups refreshed: {} added, {} removed", added, removed);
    } else {
        debug!("Groups unchanged ({} groups)", merged.len());
    }

    settings.set_groups(merged.clone())?;
    Ok(merged)
}
