use std::collections::HashMap;

use crate::client::WorkItemStore;
use crate::config::Relation;
use crate::error::Result;
use crate::sync::{SyncProgress, SyncReport};

/// Attach each configured child to its parent with a hierarchy relation.
/// Both ends must exist in the project; a relation naming an unknown id is
/// logged and skipped. Link failures are item-local.
pub async fn sync_relations<S: WorkItemStore>(
    store: &S,
    project: &str,
    relations: &[Relation],
    progress: &dyn SyncProgress,
) -> Result<SyncReport> {
    let query =
        format!("Select [System.Id] From WorkItems Where [System.TeamProject] = '{project}'");
    let response = store.query(&query).await?;
    let urls_by_id: HashMap<u64, &str> = response
        .work_items
        .iter()
        .map(|item| (item.id, item.url.as_str()))
        .collect();
    progress.on_items_received("relations", relations.len());

    let mut updated: u64 = 0;
    let mut failed: u64 = 0;
    for relation in relations {
        let parent_url = urls_by_id.get(&relation.parent_id).copied();
        let child_known = urls_by_id.contains_key(&relation.child_id);
        if parent_url.is_none() {
            log::error!(
                "Cannot find the parent {} in the work items",
                relation.parent_id
            );
        }
        if !child_known {
            log::error!(
                "Cannot find the child {} in the work items",
                relation.child_id
            );
        }
        let Some(parent_url) = parent_url else {
            failed += 1;
            continue;
        };
        if !child_known {
            failed += 1;
            continue;
        }
        match store.link_parent(relation.child_id, parent_url).await {
            Ok(()) => {
                updated += 1;
                progress.on_item_updated("relations", relation.child_id);
            }
            Err(e) => {
                log::error!("Cannot patch the work item {}: {e}", relation.child_id);
                failed += 1;
            }
        }
    }

    Ok(SyncReport::from_counts(
        "relations".to_string(),
        relations.len() as u64,
        updated,
        failed,
    ))
}
