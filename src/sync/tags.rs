use std::collections::HashMap;

use serde_json::Value;

use crate::client::ops::{PatchOp, PARENT_FIELD, TAGS_FIELD, TITLE_FIELD};
use crate::client::wiql::WorkItemDetail;
use crate::client::WorkItemStore;
use crate::error::Result;
use crate::sync::{SyncProgress, SyncReport};

/// Tag derived from an epic title: `Task ` plus the title's first two
/// characters, or the whole title when it is shorter.
pub fn epic_tag(title: &str) -> String {
    let prefix: String = title.chars().take(2).collect();
    format!("Task {prefix}")
}

/// True when `tag` already occurs in a `;`-separated tag list.
pub fn has_tag(existing: &str, tag: &str) -> bool {
    existing.split(';').any(|candidate| candidate.trim() == tag)
}

/// Append `tag` to a `;`-separated tag list.
pub fn merge_tag(existing: &str, tag: &str) -> String {
    if existing.is_empty() {
        tag.to_string()
    } else {
        format!("{existing}; {tag}")
    }
}

#[derive(Default)]
struct TagCounts {
    seen: u64,
    updated: u64,
    failed: u64,
}

/// Propagate each epic's tag down its subtree: features under the epic,
/// backlog items and bugs under those features, and tasks under those
/// backlog items. Items already carrying the tag are left alone; the walk
/// patches the deepest level first.
pub async fn sync_tags<S: WorkItemStore>(
    store: &S,
    project: &str,
    progress: &dyn SyncProgress,
) -> Result<SyncReport> {
    log::info!("Adding tags to features and their descendants");
    let epic_tags = tags_by_epic(store, project).await?;

    let query = format!(
        "Select [System.Id], [System.Title], [System.WorkItemType], [System.Parent] \
         From WorkItems Where [System.WorkItemType] = 'Feature' \
         AND [System.TeamProject] = '{project}'"
    );
    let response = store.query(&query).await?;
    progress.on_items_received("tags", response.work_items.len());

    let mut counts = TagCounts::default();
    for feature in &response.work_items {
        counts.seen += 1;
        let detail = match store
            .work_item_by_url(&feature.url, &[PARENT_FIELD, TAGS_FIELD])
            .await
        {
            Ok(Some(detail)) => detail,
            Ok(None) => {
                log::warn!("Cannot get details for feature {}", feature.id);
                counts.failed += 1;
                continue;
            }
            Err(e) => {
                log::warn!("Failed to fetch feature {}: {e}", feature.id);
                counts.failed += 1;
                continue;
            }
        };
        let Some(parent) = detail.fields.get(PARENT_FIELD).and_then(Value::as_u64) else {
            log::debug!("Feature {} has no parent epic, skipping", detail.id);
            continue;
        };
        let Some(tag) = epic_tags.get(&parent) else {
            log::warn!("No tag for epic {parent} referenced by feature {}", detail.id);
            continue;
        };
        tag_backlog_items(store, project, detail.id, tag, &mut counts).await?;
        apply_tag(store, "feature", &detail, &feature.url, tag, &mut counts).await;
    }

    Ok(SyncReport::from_counts(
        "tags".to_string(),
        counts.seen,
        counts.updated,
        counts.failed,
    ))
}

/// Resolve every epic in the project to the tag its subtree should carry.
async fn tags_by_epic<S: WorkItemStore>(store: &S, project: &str) -> Result<HashMap<u64, String>> {
    let query = format!(
        "Select [System.Id], [System.Title], [System.WorkItemType] \
         From WorkItems Where [System.WorkItemType] = 'Epic' \
         AND [System.TeamProject] = '{project}'"
    );
    let response = store.query(&query).await?;
    let mut tags = HashMap::new();
    for epic in &response.work_items {
        match store.work_item_by_url(&epic.url, &[TITLE_FIELD]).await {
            Ok(Some(detail)) => match detail.fields.get(TITLE_FIELD).and_then(Value::as_str) {
                Some(title) => {
                    tags.insert(detail.id, epic_tag(title));
                }
                None => log::warn!("Epic {} has no title, skipping", detail.id),
            },
            Ok(None) => log::warn!("Cannot get details for epic {}", epic.id),
            Err(e) => log::warn!("Failed to fetch epic {}: {e}", epic.id),
        }
    }
    Ok(tags)
}

/// Tag the backlog items and bugs under one feature, tasks first.
async fn tag_backlog_items<S: WorkItemStore>(
    store: &S,
    project: &str,
    feature_id: u64,
    tag: &str,
    counts: &mut TagCounts,
) -> Result<()> {
    let query = format!(
        "Select [System.Id], [System.Title], [System.WorkItemType] \
         From WorkItems Where ([System.WorkItemType] = 'Product Backlog Item' \
         OR [System.WorkItemType] = 'Bug') AND [System.Parent] = {feature_id} \
         AND [System.TeamProject] = '{project}'"
    );
    let response = store.query(&query).await?;
    for item in &response.work_items {
        counts.seen += 1;
        let detail = match store
            .work_item_by_url(&item.url, &[TAGS_FIELD, PARENT_FIELD])
            .await
        {
            Ok(Some(detail)) => detail,
            Ok(None) => {
                log::warn!("Cannot get details for work item {}", item.id);
                counts.failed += 1;
                continue;
            }
            Err(e) => {
                log::warn!("Failed to fetch work item {}: {e}", item.id);
                counts.failed += 1;
                continue;
            }
        };
        tag_tasks(store, project, detail.id, tag, counts).await?;
        apply_tag(store, "PBI", &detail, &item.url, tag, counts).await;
    }
    Ok(())
}

/// Tag the tasks under one backlog item.
async fn tag_tasks<S: WorkItemStore>(
    store: &S,
    project: &str,
    backlog_item_id: u64,
    tag: &str,
    counts: &mut TagCounts,
) -> Result<()> {
    let query = format!(
        "Select [System.Id], [System.Title], [System.WorkItemType] \
         From WorkItems Where [System.WorkItemType] = 'Task' \
         AND [System.Parent] = {backlog_item_id} \
         AND [System.TeamProject] = '{project}'"
    );
    let response = store.query(&query).await?;
    for task in &response.work_items {
        counts.seen += 1;
        match store
            .work_item_by_url(&task.url, &[TAGS_FIELD, PARENT_FIELD])
            .await
        {
            Ok(Some(detail)) => {
                apply_tag(store, "task", &detail, &task.url, tag, counts).await;
            }
            Ok(None) => {
                log::warn!("Cannot get details for task {}", task.id);
                counts.failed += 1;
            }
            Err(e) => {
                log::warn!("Failed to fetch task {}: {e}", task.id);
                counts.failed += 1;
            }
        }
    }
    Ok(())
}

/// Merge the tag into one item's tag list and patch it, unless the item
/// already carries it.
async fn apply_tag<S: WorkItemStore>(
    store: &S,
    kind: &str,
    detail: &WorkItemDetail,
    url: &str,
    tag: &str,
    counts: &mut TagCounts,
) {
    let existing = detail
        .fields
        .get(TAGS_FIELD)
        .and_then(Value::as_str)
        .unwrap_or("");
    if has_tag(existing, tag) {
        return;
    }
    let merged = merge_tag(existing, tag);
    let patch = [PatchOp::add_field(TAGS_FIELD, merged.clone())];
    match store.update_fields_by_url(url, &patch).await {
        Ok(()) => {
            log::info!("Updated {kind} {} with tags: {merged}", detail.id);
            counts.updated += 1;
        }
        Err(e) => {
            log::error!("Cannot patch {kind} {}: {e}", detail.id);
            counts.failed += 1;
        }
    }
}
