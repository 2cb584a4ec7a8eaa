//! In-memory [`WorkItemStore`] used by the job tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::client::ops::PatchOp;
use crate::client::wiql::{CreatedWorkItem, QueryResponse, WorkItemDetail, WorkItemRef};
use crate::client::WorkItemStore;
use crate::error::{Error, Result};

/// Fake remote store holding work items as raw field maps. Queries honor the
/// `[System.WorkItemType] = '...'` and `[System.Parent] = n` clauses the jobs
/// emit; everything else in the WIQL text is ignored. Failures are scripted
/// per item id.
#[derive(Clone, Default)]
pub struct FakeStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    items: HashMap<u64, Map<String, Value>>,
    failing_fetches: HashSet<u64>,
    failing_patches: HashSet<u64>,
    failing_queries: bool,
    failing_creates: bool,
    patches: Vec<(u64, Vec<PatchOp>)>,
    created: Vec<(String, Vec<PatchOp>)>,
    links: Vec<(u64, String)>,
    next_id: u64,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The URL shape the fake hands out for an item id.
    pub fn item_url(id: u64) -> String {
        format!("https://dev.azure.example/org/Demo/_apis/wit/workItems/{id}")
    }

    /// Insert an item with the given fields object.
    pub fn insert(&self, id: u64, fields: Value) {
        let fields = match fields {
            Value::Object(map) => map,
            other => panic!("fields must be a JSON object, got {other}"),
        };
        self.lock().items.insert(id, fields);
    }

    /// Make detail fetches for `id` answer as not found.
    pub fn fail_fetch(&self, id: u64) {
        self.lock().failing_fetches.insert(id);
    }

    /// Make patches against `id` fail with a remote error.
    pub fn fail_patch(&self, id: u64) {
        self.lock().failing_patches.insert(id);
    }

    /// Make every query fail with a remote error.
    pub fn fail_queries(&self) {
        self.lock().failing_queries = true;
    }

    /// Make every creation fail with a remote error.
    pub fn fail_creates(&self) {
        self.lock().failing_creates = true;
    }

    /// Field patches recorded so far, as `(item id, ops)` in arrival order.
    pub fn patches(&self) -> Vec<(u64, Vec<PatchOp>)> {
        self.lock().patches.clone()
    }

    /// Creations recorded so far, as `(work item type, ops)`.
    pub fn created(&self) -> Vec<(String, Vec<PatchOp>)> {
        self.lock().created.clone()
    }

    /// Parent links recorded so far, as `(child id, parent url)`.
    pub fn links(&self) -> Vec<(u64, String)> {
        self.lock().links.clone()
    }

    /// Current value of one field of one stored item.
    pub fn field(&self, id: u64, name: &str) -> Option<Value> {
        self.lock().items.get(&id).and_then(|fields| fields.get(name).cloned())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }
}

/// Pull every `[System.WorkItemType] = '<type>'` value out of a WIQL string.
fn query_types(wiql: &str) -> Vec<String> {
    let mut types = Vec::new();
    let needle = "[System.WorkItemType] = '";
    let mut rest = wiql;
    while let Some(at) = rest.find(needle) {
        rest = &rest[at + needle.len()..];
        if let Some(end) = rest.find('\'') {
            types.push(rest[..end].to_string());
            rest = &rest[end..];
        } else {
            break;
        }
    }
    types
}

/// Pull the `[System.Parent] = <id>` constraint out of a WIQL string.
fn query_parent(wiql: &str) -> Option<u64> {
    let needle = "[System.Parent] = ";
    let at = wiql.find(needle)?;
    let digits: String = wiql[at + needle.len()..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn remote_error(what: &str) -> Error {
    Error::Api {
        status: 400,
        body: format!("{what} rejected by fake store"),
    }
}

#[async_trait]
impl WorkItemStore for FakeStore {
    async fn query(&self, wiql: &str) -> Result<QueryResponse> {
        let inner = self.lock();
        if inner.failing_queries {
            return Err(remote_error("query"));
        }
        let types = query_types(wiql);
        let parent = query_parent(wiql);
        let mut matches: Vec<u64> = inner
            .items
            .iter()
            .filter(|(_, fields)| {
                if !types.is_empty() {
                    let item_type = fields
                        .get("System.WorkItemType")
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    if !types.iter().any(|t| t == item_type) {
                        return false;
                    }
                }
                if let Some(parent) = parent {
                    if fields.get("System.Parent").and_then(Value::as_u64) != Some(parent) {
                        return false;
                    }
                }
                true
            })
            .map(|(id, _)| *id)
            .collect();
        matches.sort_unstable();
        Ok(QueryResponse {
            columns: Vec::new(),
            work_items: matches
                .into_iter()
                .map(|id| WorkItemRef {
                    id,
                    url: Self::item_url(id),
                })
                .collect(),
        })
    }

    async fn work_item(&self, id: u64, _fields: &[&str]) -> Result<Option<WorkItemDetail>> {
        let inner = self.lock();
        if inner.failing_fetches.contains(&id) {
            return Ok(None);
        }
        Ok(inner
            .items
            .get(&id)
            .map(|fields| WorkItemDetail { id, fields: fields.clone() }))
    }

    async fn work_item_by_url(&self, url: &str, fields: &[&str]) -> Result<Option<WorkItemDetail>> {
        let id: u64 = url
            .rsplit('/')
            .next()
            .and_then(|tail| tail.parse().ok())
            .ok_or_else(|| Error::UrlParse(format!("no item id in {url}")))?;
        self.work_item(id, fields).await
    }

    async fn update_fields(&self, id: u64, ops: &[PatchOp]) -> Result<()> {
        let mut inner = self.lock();
        if inner.failing_patches.contains(&id) {
            return Err(remote_error("patch"));
        }
        inner.patches.push((id, ops.to_vec()));
        if let Some(fields) = inner.items.get_mut(&id) {
            for op in ops {
                if let Some(field) = op.path.strip_prefix("/fields/") {
                    fields.insert(field.to_string(), op.value.clone());
                }
            }
        }
        Ok(())
    }

    async fn update_fields_by_url(&self, url: &str, ops: &[PatchOp]) -> Result<()> {
        let id: u64 = url
            .rsplit('/')
            .next()
            .and_then(|tail| tail.parse().ok())
            .ok_or_else(|| Error::UrlParse(format!("no item id in {url}")))?;
        self.update_fields(id, ops).await
    }

    async fn create_work_item(
        &self,
        work_item_type: &str,
        ops: &[PatchOp],
    ) -> Result<CreatedWorkItem> {
        let mut inner = self.lock();
        if inner.failing_creates {
            return Err(remote_error("create"));
        }
        let id = 9000 + inner.next_id;
        inner.next_id += 1;
        inner.created.push((work_item_type.to_string(), ops.to_vec()));
        let mut fields = Map::new();
        fields.insert(
            "System.WorkItemType".to_string(),
            Value::String(work_item_type.to_string()),
        );
        for op in ops {
            if let Some(field) = op.path.strip_prefix("/fields/") {
                fields.insert(field.to_string(), op.value.clone());
            }
        }
        inner.items.insert(id, fields);
        Ok(CreatedWorkItem { id })
    }

    async fn link_parent(&self, child_id: u64, parent_url: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.failing_patches.contains(&child_id) {
            return Err(remote_error("patch"));
        }
        inner.links.push((child_id, parent_url.to_string()));
        Ok(())
    }
}
