use std::collections::HashMap;

use crate::client::ops::{format_date, PatchOp, START_DATE_FIELD, TARGET_DATE_FIELD, TITLE_FIELD};
use crate::client::WorkItemStore;
use crate::config::NewWorkItem;
use crate::error::Result;
use crate::sync::{SyncProgress, SyncReport};

/// Operations creating one work item: the title plus whichever scheduling
/// dates the template defines.
pub fn creation_ops(template: &NewWorkItem) -> Vec<PatchOp> {
    let mut ops = vec![PatchOp::add_field(TITLE_FIELD, template.title.clone())];
    if let Some(start) = template.start_date {
        ops.push(PatchOp::add_field(START_DATE_FIELD, format_date(start)));
    }
    if let Some(target) = template.target_date {
        ops.push(PatchOp::add_field(TARGET_DATE_FIELD, format_date(target)));
    }
    ops
}

/// Create each configured work item and, when the template names a parent
/// that exists in the project, link the new item underneath it. A failed
/// creation is logged and the remaining templates still run; a template
/// whose parent id is unknown leaves the created item unparented.
pub async fn create_work_items<S: WorkItemStore>(
    store: &S,
    project: &str,
    templates: &[NewWorkItem],
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
    progress.on_items_received("create", templates.len());

    let mut created: u64 = 0;
    let mut failed: u64 = 0;
    for template in templates {
        let ops = creation_ops(template);
        let item = match store.create_work_item(&template.work_item_type, &ops).await {
            Ok(item) => item,
            Err(e) => {
                log::error!("Cannot create the work item '{}': {e}", template.title);
                failed += 1;
                continue;
            }
        };
        created += 1;
        progress.on_item_updated("create", item.id);

        let Some(parent_id) = template.parent_id else {
            continue;
        };
        let Some(parent_url) = urls_by_id.get(&parent_id).copied() else {
            log::warn!(
                "The parent {parent_id} does not exist for the child '{}'",
                template.title
            );
            continue;
        };
        if let Err(e) = store.link_parent(item.id, parent_url).await {
            log::error!("Cannot patch the work item {}: {e}", item.id);
            failed += 1;
        }
    }

    Ok(SyncReport::from_counts(
        "create".to_string(),
        templates.len() as u64,
        created,
        failed,
    ))
}
