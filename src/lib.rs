pub mod client;
pub mod config;
pub mod error;
pub mod sync;

pub use client::{Client, WorkItemStore};
pub use config::Settings;
pub use error::{Error, Result};
pub use sync::{NoopProgress, SyncOptions, SyncProgress, SyncReport, SyncStatus};

use sync::{create, dates, relations, tags};

/// Main entry point for the Azure DevOps sync jobs.
///
/// Generic over the store so tests can run the jobs against an in-memory
/// implementation; production code uses the HTTP-backed [`Client`].
pub struct AdoSync<S = Client> {
    settings: Settings,
    store: S,
}

impl AdoSync<Client> {
    /// Build the facade with an HTTP client derived from the settings.
    pub fn new(settings: Settings) -> Result<Self> {
        let store = Client::new(&settings)?;
        Ok(Self { settings, store })
    }
}

impl<S> AdoSync<S>
where
    S: WorkItemStore + Clone + 'static,
{
    /// Build the facade over any store implementation.
    pub fn with_store(settings: Settings, store: S) -> Self {
        Self { settings, store }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Roll child dates up onto parents, one pass per configured work item
    /// type.
    pub async fn sync_dates(
        &self,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> Result<Vec<SyncReport>> {
        dates::sync_dates(&self.store, &self.settings.project, options, progress).await
    }

    /// Propagate epic tags down the feature/backlog item/task hierarchy.
    pub async fn sync_tags(&self, progress: &dyn SyncProgress) -> Result<SyncReport> {
        tags::sync_tags(&self.store, &self.settings.project, progress).await
    }

    /// Link the parent/child pairs listed in the configuration.
    pub async fn sync_relations(&self, progress: &dyn SyncProgress) -> Result<SyncReport> {
        relations::sync_relations(
            &self.store,
            &self.settings.project,
            &self.settings.relations,
            progress,
        )
        .await
    }

    /// Create the work items listed in the configuration.
    pub async fn create_work_items(&self, progress: &dyn SyncProgress) -> Result<SyncReport> {
        create::create_work_items(
            &self.store,
            &self.settings.project,
            &self.settings.work_items,
            progress,
        )
        .await
    }

    /// Run every job in dependency order: create configured items first so
    /// later passes can see them, then wire configured relations, then
    /// propagate tags, then roll dates up. A job that fails is captured as
    /// a failed report and the remaining jobs still run.
    pub async fn sync_all(
        &self,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> Result<Vec<SyncReport>> {
        let mut reports = Vec::new();

        if self.settings.work_items.is_empty() {
            log::debug!("No work items configured to create, skipping");
        } else {
            match self.create_work_items(progress).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    log::error!("Failed to create work items: {e}");
                    reports.push(failed_report("create", &e));
                }
            }
        }

        if self.settings.relations.is_empty() {
            log::debug!("No relations configured, skipping");
        } else {
            match self.sync_relations(progress).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    log::error!("Failed to set parent relations: {e}");
                    reports.push(failed_report("relations", &e));
                }
            }
        }

        match self.sync_tags(progress).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                log::error!("Failed to propagate tags: {e}");
                reports.push(failed_report("tags", &e));
            }
        }

        match self.sync_dates(options, progress).await {
            Ok(mut date_reports) => reports.append(&mut date_reports),
            Err(e) => {
                log::error!("Failed to roll dates up: {e}");
                reports.push(failed_report("dates", &e));
            }
        }

        Ok(reports)
    }
}

fn failed_report(scope: &str, error: &Error) -> SyncReport {
    SyncReport {
        scope: scope.to_string(),
        status: SyncStatus::Failed,
        items_seen: 0,
        items_updated: 0,
        items_failed: 1,
        error: Some(error.to_string()),
    }
}
