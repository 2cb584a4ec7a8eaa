pub mod ops;
pub mod wiql;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use url::Url;

use crate::config::Settings;
use crate::error::{Error, Result};
use ops::PatchOp;
use wiql::{CreatedWorkItem, QueryResponse, WorkItemDetail};

/// REST API version appended to every versioned request.
const API_VERSION: &str = "7.1";
const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

/// Remote store contract the jobs run against. `Client` is the production
/// implementation; tests substitute an in-memory fake.
///
/// Failure semantics follow the batch-fatal/item-local split: `query` errors
/// abort the calling pass, while a `work_item*` lookup answers `Ok(None)` for
/// a non-success status and `update_fields*` failures surface as
/// `Error::Api` for the caller to log and skip.
#[async_trait]
pub trait WorkItemStore: Send + Sync {
    /// Run a WIQL query, returning the matching item id/url pairs.
    async fn query(&self, wiql: &str) -> Result<QueryResponse>;

    /// Fetch the selected fields of one work item by id.
    async fn work_item(&self, id: u64, fields: &[&str]) -> Result<Option<WorkItemDetail>>;

    /// Fetch a work item addressed by the URL a query returned, expanding
    /// all fields.
    async fn work_item_by_url(&self, url: &str, select: &[&str])
        -> Result<Option<WorkItemDetail>>;

    /// Apply JSON-patch operations to a work item by id.
    async fn update_fields(&self, id: u64, ops: &[PatchOp]) -> Result<()>;

    /// Apply JSON-patch operations to a work item addressed by URL.
    async fn update_fields_by_url(&self, url: &str, ops: &[PatchOp]) -> Result<()>;

    /// Create a work item of the given type from JSON-patch operations.
    async fn create_work_item(&self, work_item_type: &str, ops: &[PatchOp])
        -> Result<CreatedWorkItem>;

    /// Attach the child to its parent with a hierarchy relation patch on
    /// the child.
    async fn link_parent(&self, child_id: u64, parent_url: &str) -> Result<()>;
}

/// Azure DevOps REST client scoped to one organization and project.
///
/// Cloning shares the underlying connection pool, so per-task clones are
/// cheap.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl Client {
    /// Build a client from settings: base URL + organization + project form
    /// the request base, and the personal access token authenticates as
    /// basic auth with an empty user name.
    pub fn new(settings: &Settings) -> Result<Self> {
        let token = settings.token()?.to_string();

        let mut base = Url::parse(&settings.base_url)?;
        base.path_segments_mut()
            .map_err(|_| Error::UrlParse(format!("cannot-be-a-base URL: {}", settings.base_url)))?
            .pop_if_empty()
            .push(&settings.organization)
            .push(&settings.project)
            // Trailing slash so endpoint paths join underneath the project.
            .push("");

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self { http, base, token })
    }

    /// The resolved request base, `{base_url}{organization}/{project}/`.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let mut url = self.base.join(path)?;
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }

    async fn get_detail(&self, url: Url) -> Result<Option<WorkItemDetail>> {
        let response = self
            .http
            .get(url)
            .basic_auth("", Some(&self.token))
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let body = response.text().await?;
        parse_json(&body).map(Some)
    }

    async fn patch(&self, url: Url, ops: &[PatchOp]) -> Result<()> {
        let body = serde_json::to_vec(ops).map_err(|e| Error::Json(e.to_string()))?;
        let response = self
            .http
            .patch(url)
            .basic_auth("", Some(&self.token))
            .header(CONTENT_TYPE, JSON_PATCH_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl WorkItemStore for Client {
    async fn query(&self, wiql: &str) -> Result<QueryResponse> {
        let url = self.endpoint("_apis/wit/wiql")?;
        let response = self
            .http
            .post(url.clone())
            .basic_auth("", Some(&self.token))
            .json(&serde_json::json!({ "query": wiql }))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            log::error!("Query to {url} returned status {status}: {body}");
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }
        parse_json(&body)
    }

    async fn work_item(&self, id: u64, fields: &[&str]) -> Result<Option<WorkItemDetail>> {
        let mut url = self.endpoint(&format!("_apis/wit/workitems/{id}"))?;
        url.query_pairs_mut().append_pair("fields", &fields.join(","));
        self.get_detail(url).await
    }

    async fn work_item_by_url(
        &self,
        url: &str,
        select: &[&str],
    ) -> Result<Option<WorkItemDetail>> {
        let mut url = Url::parse(url)?;
        url.query_pairs_mut()
            .append_pair("$expand", "all")
            .append_pair("$select", &select.join(","));
        self.get_detail(url).await
    }

    async fn update_fields(&self, id: u64, ops: &[PatchOp]) -> Result<()> {
        let url = self.endpoint(&format!("_apis/wit/workitems/{id}"))?;
        self.patch(url, ops).await
    }

    async fn update_fields_by_url(&self, url: &str, ops: &[PatchOp]) -> Result<()> {
        let mut url = Url::parse(url)?;
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        self.patch(url, ops).await
    }

    async fn create_work_item(
        &self,
        work_item_type: &str,
        ops: &[PatchOp],
    ) -> Result<CreatedWorkItem> {
        let url = self.endpoint(&format!("_apis/wit/workitems/${work_item_type}"))?;
        let body = serde_json::to_vec(ops).map_err(|e| Error::Json(e.to_string()))?;
        let response = self
            .http
            .post(url)
            .basic_auth("", Some(&self.token))
            .header(CONTENT_TYPE, JSON_PATCH_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }
        parse_json(&body)
    }

    async fn link_parent(&self, child_id: u64, parent_url: &str) -> Result<()> {
        let ops = [PatchOp::add_parent_relation(parent_url)];
        self.update_fields(child_id, &ops).await
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| Error::Json(format!("cannot parse json {body}: {e}")))
}
