//! Bounded-parallel enumeration of resource types

use std::future::Future;

use futures_util::stream::{self, StreamExt};
use tracing::debug;

use crate::domain::graph::{GraphNodeInput, ResourceType};

/// Merged output of a set of per-type enumerations
#[derive(Debug, Default)]
pub struct Enumeration {
    /// Every node returned, ordered by id
    pub nodes: Vec<GraphNodeInput>,
    /// One entry per failed resource type, prefixed with the type
    pub errors: Vec<String>,
}

/// Run `enumerate` for each resource type with at most `concurrency` in flight
///
/// Results are collected as values and merged afterwards, so enumerations
/// share no mutable state. A failing type contributes an error and never
/// prevents the others from completing.
pub async fn enumerate_concurrently<F, Fut>(
    resource_types: Vec<ResourceType>,
    concurrency: usize,
    enumerate: F,
) -> Enumeration
where
    F: Fn(ResourceType) -> Fut,
    Fut: Future<Output = std::result::Result<Vec<GraphNodeInput>, String>>,
{
    let mut results: Vec<(ResourceType, std::result::Result<Vec<GraphNodeInput>, String>)> =
        stream::iter(resource_types)
            .map(|resource_type| {
                let fut = enumerate(resource_type);
                async move { (resource_type, fut.await) }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
    results.sort_by_key(|(resource_type, _)| *resource_type);

    let mut merged = Enumeration::default();
    for (resource_type, result) in results {
        match result {
            Ok(nodes) => {
                debug!(resource_type = %resource_type, count = nodes.len(), "Enumerated resource type");
                merged.nodes.extend(nodes);
            }
            Err(message) => {
                debug!(resource_type = %resource_type, error = %message, "Enumeration failed");
                merged.errors.push(format!("{}: {}", resource_type, message));
            }
        }
    }
    merged.nodes.sort_by_key(|n| n.id());
    merged
}
