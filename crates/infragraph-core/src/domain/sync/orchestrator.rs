//! Provider sync cycles
//!
//! A cycle runs one adapter, merges its output into storage, infers
//! cross-cloud edges, marks what went missing and records every observed
//! change in the ledger. The sync record is the source of truth for how the
//! cycle went.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::drift::diff_nodes;
use super::retention::{KeepForever, RetainFor, RetentionPolicy};
use crate::config::{InferenceConfig, SyncConfig};
use crate::domain::discovery::{DiscoveryAdapter, DiscoveryOptions, DiscoveryResult};
use crate::domain::graph::{
    ChangeType, CloudProvider, GraphChangeInput, GraphStorage, NodeFilter, SyncRecord,
    edge_target_id, timestamp_now,
};
use crate::domain::inference::RelationshipInferenceEngine;
use crate::error::Result;

const VIA_SYNC: &str = "sync";
const VIA_INFERENCE: &str = "inference";
const VIA_RETENTION: &str = "retention";
const MAX_EDGE_AGE_HOURS: i64 = 24 * 1_000_000;

/// Outcome of an inference pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceSummary {
    pub inferred: u64,
    pub created: u64,
}

/// Outcome of post-sync housekeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSummary {
    pub purged_nodes: Vec<String>,
    pub pruned_edges: Vec<String>,
}

/// Outcome of a multi-provider wave
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncWaveReport {
    pub records: Vec<SyncRecord>,
    pub inference: InferenceSummary,
    pub maintenance: MaintenanceSummary,
}

impl SyncWaveReport {
    pub fn record_for(&self, provider: CloudProvider) -> Option<&SyncRecord> {
        self.records.iter().find(|r| r.provider == provider)
    }
}

/// Drives discovery cycles against a storage backend
pub struct SyncOrchestrator {
    storage: Arc<dyn GraphStorage>,
    engine: RelationshipInferenceEngine,
    config: SyncConfig,
    retention: Box<dyn RetentionPolicy>,
}

impl SyncOrchestrator {
    pub fn new(storage: Arc<dyn GraphStorage>, inference: InferenceConfig, config: SyncConfig) -> Self {
        let retention: Box<dyn RetentionPolicy> = match config.disappeared_retention_days {
            Some(days) => Box::new(RetainFor::days(days)),
            None => Box::new(KeepForever),
        };
        Self {
            storage,
            engine: RelationshipInferenceEngine::new(inference),
            config,
            retention,
        }
    }

    pub fn with_retention(mut self, policy: impl RetentionPolicy + 'static) -> Self {
        self.retention = Box::new(policy);
        self
    }

    pub fn storage(&self) -> &Arc<dyn GraphStorage> {
        &self.storage
    }

    pub fn engine(&self) -> &RelationshipInferenceEngine {
        &self.engine
    }

    /// Run one provider cycle, then inference and housekeeping
    ///
    /// An adapter that cannot be invoked yields a failed record, not an
    /// error. Storage errors are returned after the record has been
    /// finalized as far as storage allows.
    pub async fn sync_provider(
        &self,
        adapter: &dyn DiscoveryAdapter,
        options: &DiscoveryOptions,
    ) -> Result<SyncRecord> {
        let record = self.run_cycle(adapter, options, true).await?;
        self.maintain().await?;
        Ok(record)
    }

    /// Run several providers concurrently, then infer once over the result
    ///
    /// Every cycle is allowed to finish before the first storage error, if
    /// any, is returned.
    pub async fn sync_wave(
        &self,
        adapters: &[Arc<dyn DiscoveryAdapter>],
        options: &DiscoveryOptions,
    ) -> Result<SyncWaveReport> {
        let cycles: Vec<_> = adapters
            .iter()
            .map(|adapter| self.run_cycle(adapter.as_ref(), options, false))
            .collect();
        let results = futures_util::future::join_all(cycles).await;

        let mut records = Vec::with_capacity(results.len());
        for result in results {
            records.push(result?);
        }

        let inference = self.infer(None).await?;
        let maintenance = self.maintain().await?;

        info!(
            providers = records.len(),
            inferred = inference.inferred,
            created = inference.created,
            "Sync wave finished"
        );
        Ok(SyncWaveReport {
            records,
            inference,
            maintenance,
        })
    }

    /// Infer cross-cloud edges over every stored node
    pub async fn infer(&self, correlation_id: Option<&str>) -> Result<InferenceSummary> {
        let nodes = self.storage.query_nodes(&NodeFilter::new()).await?;
        let edges = self.engine.discover_cross_cloud_relationships(&nodes);

        let mut summary = InferenceSummary {
            inferred: edges.len() as u64,
            created: 0,
        };
        for edge in &edges {
            let upsert = self.storage.upsert_edge(edge).await?;
            if upsert.created {
                summary.created += 1;
                let mut change =
                    GraphChangeInput::new(edge_target_id(&upsert.edge.id), ChangeType::EdgeCreated)
                        .detected_via(VIA_INFERENCE);
                change.metadata = upsert.edge.metadata.clone();
                if let Some(id) = correlation_id {
                    change = change.with_correlation(id);
                }
                self.storage.append_change(change).await?;
            }
        }
        Ok(summary)
    }

    /// Apply retention and stale-edge pruning
    pub async fn maintain(&self) -> Result<MaintenanceSummary> {
        let now = timestamp_now();
        let mut summary = MaintenanceSummary::default();

        if let Some(cutoff) = self.retention.purge_cutoff(now) {
            summary.purged_nodes = self.storage.purge_disappeared_nodes(cutoff).await?;
            if !summary.purged_nodes.is_empty() {
                let changes = summary
                    .purged_nodes
                    .iter()
                    .map(|id| GraphChangeInput::new(id.as_str(), ChangeType::NodeDeleted).detected_via(VIA_RETENTION))
                    .collect();
                self.storage.append_changes(changes).await?;
                info!(
                    count = summary.purged_nodes.len(),
                    policy = %self.retention.describe(),
                    "Purged disappeared nodes"
                );
            }
        }

        if let Some(hours) = self.config.stale_edge_max_age_hours {
            let hours = i64::try_from(hours).unwrap_or(MAX_EDGE_AGE_HOURS).min(MAX_EDGE_AGE_HOURS);
            if let Some(cutoff) = now.checked_sub_signed(Duration::hours(hours)) {
                let removed = self.storage.delete_stale_edges(cutoff).await?;
                if !removed.is_empty() {
                    let changes = removed
                        .iter()
                        .map(|e| {
                            GraphChangeInput::new(edge_target_id(&e.id), ChangeType::EdgeDeleted)
                                .detected_via(VIA_SYNC)
                        })
                        .collect();
                    self.storage.append_changes(changes).await?;
                    info!(count = removed.len(), "Pruned stale edges");
                }
                summary.pruned_edges = removed.into_iter().map(|e| e.id).collect();
            }
        }

        Ok(summary)
    }

    async fn run_cycle(
        &self,
        adapter: &dyn DiscoveryAdapter,
        options: &DiscoveryOptions,
        run_inference: bool,
    ) -> Result<SyncRecord> {
        let provider = adapter.provider();
        let mut record = SyncRecord::new(provider);
        record.start(timestamp_now());
        self.storage.save_sync_record(&record).await?;
        info!(provider = %provider, sync_id = %record.id, adapter = adapter.display_name(), "Sync started");

        let result = match adapter.discover(options).await {
            Ok(result) => result,
            Err(e) => {
                warn!(provider = %provider, error = %e, "Discovery adapter failed");
                record.fail(timestamp_now(), e.to_string());
                self.storage.save_sync_record(&record).await?;
                return Ok(record);
            }
        };

        record.nodes_discovered = result.nodes.len() as u64;
        record.edges_discovered = result.edges.len() as u64;
        record.errors.extend(result.errors.iter().cloned());

        let mut persisted = 0u64;
        let outcome = self
            .ingest(&mut record, &result, options, run_inference, &mut persisted)
            .await;

        match outcome {
            Ok(()) => {
                record.finish(timestamp_now());
                self.storage.save_sync_record(&record).await?;
                info!(
                    provider = %provider,
                    sync_id = %record.id,
                    status = %record.status,
                    nodes_created = record.nodes_created,
                    nodes_updated = record.nodes_updated,
                    nodes_disappeared = record.nodes_disappeared,
                    edges_created = record.edges_created,
                    "Sync finished"
                );
                Ok(record)
            }
            Err(e) => {
                warn!(provider = %provider, sync_id = %record.id, error = %e, "Sync aborted on storage error");
                let message = format!("storage: {}", e);
                if persisted == 0 {
                    record.fail(timestamp_now(), message);
                } else {
                    record.errors.push(message);
                    record.finish(timestamp_now());
                }
                if let Err(save_err) = self.storage.save_sync_record(&record).await {
                    warn!(sync_id = %record.id, error = %save_err, "Could not finalize sync record");
                }
                Err(e)
            }
        }
    }

    async fn ingest(
        &self,
        record: &mut SyncRecord,
        result: &DiscoveryResult,
        options: &DiscoveryOptions,
        run_inference: bool,
        persisted: &mut u64,
    ) -> Result<()> {
        let correlation = record.id.clone();

        for input in &result.nodes {
            let upsert = self.storage.upsert_node(input).await?;
            *persisted += 1;

            let changes: Vec<GraphChangeInput> = match &upsert.previous {
                None => {
                    record.nodes_created += 1;
                    vec![GraphChangeInput::new(upsert.node.id.as_str(), ChangeType::NodeCreated)]
                }
                Some(previous) if upsert.changed => {
                    record.nodes_updated += 1;
                    diff_nodes(previous, &upsert.node)
                        .iter()
                        .map(|c| c.to_change_input(&upsert.node.id))
                        .collect()
                }
                Some(_) => Vec::new(),
            };
            if !changes.is_empty() {
                let changes = changes
                    .into_iter()
                    .map(|c| c.with_correlation(correlation.as_str()))
                    .collect();
                self.storage.append_changes(changes).await?;
            }
        }

        for input in &result.edges {
            let upsert = self.storage.upsert_edge(input).await?;
            *persisted += 1;
            if upsert.created {
                record.edges_created += 1;
                self.storage
                    .append_change(
                        GraphChangeInput::new(edge_target_id(&upsert.edge.id), ChangeType::EdgeCreated)
                            .with_correlation(correlation.as_str()),
                    )
                    .await?;
            }
        }

        if run_inference {
            let summary = self.infer(Some(&correlation)).await?;
            record.edges_discovered += summary.inferred;
            record.edges_created += summary.created;
            *persisted += summary.inferred;
        }

        // Only a complete listing proves absence
        if options.is_scoped() || !result.errors.is_empty() {
            debug!(
                provider = %record.provider,
                scoped = options.is_scoped(),
                errors = result.errors.len(),
                "Skipping disappearance marking"
            );
            return Ok(());
        }

        let gone = self
            .storage
            .mark_nodes_disappeared(record.started_at, Some(record.provider))
            .await?;
        record.nodes_disappeared = gone.len() as u64;
        *persisted += record.nodes_disappeared;
        if !gone.is_empty() {
            let changes = gone
                .iter()
                .map(|id| {
                    GraphChangeInput::new(id.as_str(), ChangeType::NodeDisappeared)
                        .with_correlation(correlation.as_str())
                })
                .collect();
            self.storage.append_changes(changes).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::discovery::SnapshotAdapter;
    use crate::domain::graph::{ChangeFilter, NodeStatus, ResourceType, SyncStatus};
    use crate::infrastructure::InMemoryGraphStorage;
    use serde_json::{Value, json};

    fn orchestrator() -> SyncOrchestrator {
        SyncOrchestrator::new(
            Arc::new(InMemoryGraphStorage::new()),
            InferenceConfig::default(),
            SyncConfig::default(),
        )
    }

    fn aws_records() -> Vec<Value> {
        vec![
            json!({"nativeId": "vpc-1", "resourceType": "vpc", "region": "us-east-1", "accountId": "111",
                   "cidrBlock": "10.0.0.0/16"}),
            json!({"nativeId": "i-1", "resourceType": "instance", "region": "us-east-1", "accountId": "111",
                   "vpcId": "vpc-1", "costMonthly": 70.0}),
        ]
    }

    async fn pause() {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn test_first_sync_creates_everything() {
        let sync = orchestrator();
        let adapter = SnapshotAdapter::from_records(CloudProvider::Aws, aws_records());

        let record = sync.sync_provider(&adapter, &DiscoveryOptions::default()).await.unwrap();
        assert_eq!(record.status, SyncStatus::Completed);
        assert_eq!(record.nodes_created, 2);
        assert_eq!(record.edges_created, 1);

        let changes = sync
            .storage()
            .get_changes(&ChangeFilter {
                correlation_id: Some(record.id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(changes.len(), 3);
        assert!(sync.storage().get_sync_record(&record.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rerun_records_nothing_new() {
        let sync = orchestrator();
        let adapter = SnapshotAdapter::from_records(CloudProvider::Aws, aws_records());
        sync.sync_provider(&adapter, &DiscoveryOptions::default()).await.unwrap();
        let stats_before = sync.storage().get_stats().await.unwrap();

        pause().await;
        let second = sync.sync_provider(&adapter, &DiscoveryOptions::default()).await.unwrap();
        let stats_after = sync.storage().get_stats().await.unwrap();

        assert_eq!(second.nodes_created, 0);
        assert_eq!(second.nodes_updated, 0);
        assert_eq!(second.edges_created, 0);
        assert_eq!(second.nodes_disappeared, 0);
        assert_eq!(stats_before.total_edges, stats_after.total_edges);
        assert_eq!(stats_before.total_changes, stats_after.total_changes);
    }

    #[tokio::test]
    async fn test_drift_is_classified() {
        let sync = orchestrator();
        let adapter = SnapshotAdapter::from_records(CloudProvider::Aws, aws_records());
        sync.sync_provider(&adapter, &DiscoveryOptions::default()).await.unwrap();

        let mut records = aws_records();
        records[1]["costMonthly"] = json!(95.0);
        records[1]["tags"] = json!({"env": "prod"});
        let adapter = SnapshotAdapter::from_records(CloudProvider::Aws, records);
        pause().await;
        let record = sync.sync_provider(&adapter, &DiscoveryOptions::default()).await.unwrap();
        assert_eq!(record.nodes_updated, 1);

        let instance_id = "aws:111:us-east-1:instance:i-1";
        let timeline = sync.storage().get_node_timeline(instance_id, None).await.unwrap();
        let types: Vec<_> = timeline.iter().map(|c| c.change_type).collect();
        assert!(types.contains(&ChangeType::CostChanged));
        assert!(types.contains(&ChangeType::NodeDrifted));
    }

    #[tokio::test]
    async fn test_missing_node_disappears() {
        let sync = orchestrator();
        let adapter = SnapshotAdapter::from_records(CloudProvider::Aws, aws_records());
        sync.sync_provider(&adapter, &DiscoveryOptions::default()).await.unwrap();

        pause().await;
        let adapter = SnapshotAdapter::from_records(CloudProvider::Aws, aws_records()[..1].to_vec());
        let record = sync.sync_provider(&adapter, &DiscoveryOptions::default()).await.unwrap();
        assert_eq!(record.nodes_disappeared, 1);

        let node = sync
            .storage()
            .get_node("aws:111:us-east-1:instance:i-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(node.status, NodeStatus::Disappeared);
    }

    #[tokio::test]
    async fn test_scoped_or_partial_listing_never_marks_disappeared() {
        let sync = orchestrator();
        let adapter = SnapshotAdapter::from_records(CloudProvider::Aws, aws_records());
        sync.sync_provider(&adapter, &DiscoveryOptions::default()).await.unwrap();
        pause().await;

        let scoped = DiscoveryOptions::new().with_resource_type(ResourceType::Vpc);
        let record = sync.sync_provider(&adapter, &scoped).await.unwrap();
        assert_eq!(record.nodes_disappeared, 0);

        let failing = SnapshotAdapter::from_records(CloudProvider::Aws, aws_records())
            .with_failure(ResourceType::Instance, "Throttling");
        let record = sync.sync_provider(&failing, &DiscoveryOptions::default()).await.unwrap();
        assert_eq!(record.status, SyncStatus::Partial);
        assert_eq!(record.nodes_disappeared, 0);
    }

    #[tokio::test]
    async fn test_unavailable_adapter_fails_record() {
        let sync = orchestrator();
        let adapter = SnapshotAdapter::from_records(CloudProvider::Azure, Vec::new()).unavailable("expired token");

        let record = sync.sync_provider(&adapter, &DiscoveryOptions::default()).await.unwrap();
        assert_eq!(record.status, SyncStatus::Failed);
        assert!(record.completed_at.is_some());

        let last = sync.storage().get_last_sync(CloudProvider::Azure).await.unwrap().unwrap();
        assert_eq!(last.status, SyncStatus::Failed);
    }

    #[tokio::test]
    async fn test_retention_purges_disappeared_nodes() {
        let sync = orchestrator().with_retention(RetainFor(Duration::zero()));
        let adapter = SnapshotAdapter::from_records(CloudProvider::Aws, aws_records());
        sync.sync_provider(&adapter, &DiscoveryOptions::default()).await.unwrap();

        pause().await;
        let adapter = SnapshotAdapter::from_records(CloudProvider::Aws, aws_records()[..1].to_vec());
        sync.sync_provider(&adapter, &DiscoveryOptions::default()).await.unwrap();

        let instance_id = "aws:111:us-east-1:instance:i-1";
        assert!(sync.storage().get_node(instance_id).await.unwrap().is_none());
        let timeline = sync.storage().get_node_timeline(instance_id, None).await.unwrap();
        assert_eq!(timeline.last().map(|c| c.change_type), Some(ChangeType::NodeDeleted));
    }

    #[tokio::test]
    async fn test_pruned_edges_are_ledgered_exactly() {
        let config = SyncConfig {
            stale_edge_max_age_hours: Some(0),
            ..SyncConfig::default()
        };
        let sync = SyncOrchestrator::new(
            Arc::new(InMemoryGraphStorage::new()),
            InferenceConfig::default(),
            config,
        );
        let adapter = SnapshotAdapter::from_records(CloudProvider::Aws, aws_records());
        sync.sync_provider(&adapter, &DiscoveryOptions::default()).await.unwrap();

        pause().await;
        sync.maintain().await.unwrap();
        assert!(sync.storage().list_edges().await.unwrap().is_empty());

        let changes_of = |change_type| ChangeFilter {
            change_types: vec![change_type],
            ..Default::default()
        };
        let created = sync.storage().get_changes(&changes_of(ChangeType::EdgeCreated)).await.unwrap();
        let deleted = sync.storage().get_changes(&changes_of(ChangeType::EdgeDeleted)).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].target_id, created[0].target_id);

        let again = sync.maintain().await.unwrap();
        assert!(again.pruned_edges.is_empty());
        let deleted = sync.storage().get_changes(&changes_of(ChangeType::EdgeDeleted)).await.unwrap();
        assert_eq!(deleted.len(), 1);
    }

    #[tokio::test]
    async fn test_wave_infers_once_across_providers() {
        let sync = orchestrator();
        let aws: Arc<dyn DiscoveryAdapter> =
            Arc::new(SnapshotAdapter::from_records(CloudProvider::Aws, aws_records()));
        let gcp: Arc<dyn DiscoveryAdapter> = Arc::new(SnapshotAdapter::from_records(
            CloudProvider::Gcp,
            vec![json!({"nativeId": "net-1", "resourceType": "network", "projectId": "p",
                        "ipCidrRange": "10.0.8.0/24"})],
        ));

        let report = sync.sync_wave(&[aws, gcp], &DiscoveryOptions::default()).await.unwrap();
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.inference.created, 1);
        assert_eq!(
            report.record_for(CloudProvider::Gcp).map(|r| r.status),
            Some(SyncStatus::Completed)
        );

        let inferred = sync
            .storage()
            .get_changes(&ChangeFilter {
                change_types: vec![ChangeType::EdgeCreated],
                ..Default::default()
            })
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.detected_via == "inference")
            .count();
        assert_eq!(inferred, 1);
    }
}
