//! Normalization of vendor-shaped records into node inputs
//!
//! Every field is read independently. A field that is missing or has the
//! wrong shape is skipped; only `nativeId` and a recognized `resourceType`
//! are required for a record to become a node.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::graph::{CloudProvider, GraphNodeInput, NodeStatus, ResourceType};

const NATIVE_ID_KEYS: &[&str] = &["nativeId", "arn", "selfLink", "id"];
const RESOURCE_TYPE_KEYS: &[&str] = &["resourceType", "type", "kind"];
const NAME_KEYS: &[&str] = &["name", "displayName"];
const REGION_KEYS: &[&str] = &["region", "location", "zone"];
const ACCOUNT_KEYS: &[&str] = &["account", "accountId", "subscriptionId", "projectId", "project"];
const STATUS_KEYS: &[&str] = &["status", "state", "provisioningState", "phase"];
const TAG_KEYS: &[&str] = &["tags", "Tags", "labels"];
const COST_KEYS: &[&str] = &["costMonthly", "monthlyCost"];
const OWNER_KEYS: &[&str] = &["owner"];
const CREATED_KEYS: &[&str] = &["createdAt", "creationTimestamp", "launchTime", "createTime"];
const ADDRESS_KEYS: &[&str] = &[
    "cidrBlock",
    "cidrBlocks",
    "addressSpace",
    "addressPrefix",
    "addressPrefixes",
    "ipCidrRange",
];

/// Map a vendor status word onto the common lifecycle vocabulary
pub fn normalize_status(raw: &str) -> NodeStatus {
    let word = raw.trim().to_lowercase().replace(['_', ' '], "-");
    match word.as_str() {
        "running" | "available" | "active" | "succeeded" | "ready" | "in-use" | "inservice"
        | "in-service" | "enabled" | "ok" | "healthy" | "provisioned" => NodeStatus::Running,
        "stopped" | "stopping" | "deallocated" | "suspended" | "inactive" | "disabled" => {
            NodeStatus::Stopped
        }
        "pending" | "waiting" | "queued" => NodeStatus::Pending,
        "creating" | "provisioning" | "starting" | "initializing" => NodeStatus::Creating,
        "deleting" | "terminating" | "shutting-down" => NodeStatus::Deleting,
        "deleted" | "terminated" => NodeStatus::Deleted,
        "failed" | "error" | "unhealthy" | "impaired" | "crashloopbackoff" => NodeStatus::Error,
        other => NodeStatus::parse(other).unwrap_or(NodeStatus::Unknown),
    }
}

/// Normalize the tag shapes vendors use into a flat string map
///
/// Accepts AWS `[{"Key": .., "Value": ..}]` lists and plain maps (Azure tags,
/// GCP and Kubernetes labels). Null values are dropped and non-string
/// scalars are rendered as JSON.
pub fn normalize_tags(value: &Value) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    match value {
        Value::Array(entries) => {
            for entry in entries {
                let key = entry.get("Key").or_else(|| entry.get("key")).and_then(Value::as_str);
                let val = entry.get("Value").or_else(|| entry.get("value"));
                if let (Some(key), Some(val)) = (key, val.and_then(scalar_string)) {
                    tags.insert(key.to_string(), val);
                }
            }
        }
        Value::Object(map) => {
            for (key, val) in map {
                if let Some(val) = scalar_string(val) {
                    tags.insert(key.clone(), val);
                }
            }
        }
        _ => {}
    }
    tags
}

/// Collect every address range a record declares
///
/// Understands AWS `cidrBlock`, Azure `addressSpace.addressPrefixes` and
/// `addressPrefix`, and GCP `ipCidrRange`.
pub fn normalize_address_space(record: &Map<String, Value>) -> Vec<String> {
    let mut found: Vec<&str> = Vec::new();
    for key in ADDRESS_KEYS {
        match record.get(*key) {
            Some(Value::String(s)) => found.push(s.as_str()),
            Some(Value::Array(items)) => found.extend(items.iter().filter_map(Value::as_str)),
            Some(Value::Object(nested)) => {
                if let Some(Value::Array(items)) = nested.get("addressPrefixes") {
                    found.extend(items.iter().filter_map(Value::as_str));
                }
            }
            _ => {}
        }
    }

    let mut ranges: Vec<String> = Vec::new();
    for range in found.into_iter().map(str::trim).filter(|r| !r.is_empty()) {
        if !ranges.iter().any(|r| r == range) {
            ranges.push(range.to_string());
        }
    }
    ranges
}

/// Turn one vendor record into a node input
///
/// Returns `Err` only when the record is not an object or lacks a native id
/// or a recognized resource type. Keys that are not part of the common
/// schema are kept in `metadata`.
pub fn record_to_node_input(
    provider: CloudProvider,
    record: &Value,
) -> std::result::Result<GraphNodeInput, String> {
    let map = record
        .as_object()
        .ok_or_else(|| "record is not a JSON object".to_string())?;

    let native_id = first_str(map, NATIVE_ID_KEYS)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| "record has no nativeId".to_string())?;

    let raw_type = first_str(map, RESOURCE_TYPE_KEYS)
        .ok_or_else(|| format!("record '{}' has no resourceType", native_id))?;
    let resource_type = ResourceType::parse(raw_type)
        .ok_or_else(|| format!("record '{}' has unknown resourceType '{}'", native_id, raw_type))?;

    let mut input = GraphNodeInput::new(provider, resource_type, native_id);

    if let Some(name) = first_str(map, NAME_KEYS).filter(|s| !s.is_empty()) {
        input.name = name.to_string();
    }
    if let Some(region) = first_str(map, REGION_KEYS) {
        input.region = region.to_string();
    }
    if let Some(account) = first_str(map, ACCOUNT_KEYS) {
        input.account = account.to_string();
    }
    if let Some(status) = first_str(map, STATUS_KEYS) {
        input.status = normalize_status(status);
    }
    if let Some(tags) = first_value(map, TAG_KEYS) {
        input.tags = normalize_tags(tags);
    }
    // AWS carries the display name only as a tag
    if input.name == input.native_id {
        if let Some(name) = input.tags.get("Name").filter(|n| !n.is_empty()) {
            input.name = name.clone();
        }
    }
    if let Some(cost) = first_value(map, COST_KEYS).and_then(Value::as_f64) {
        if cost.is_finite() && cost >= 0.0 {
            input.cost_monthly = Some(cost);
        }
    }
    if let Some(owner) = first_str(map, OWNER_KEYS).filter(|s| !s.is_empty()) {
        input.owner = Some(owner.to_string());
    }
    input.created_at = first_str(map, CREATED_KEYS).and_then(parse_created_at);

    if let Some(Value::Object(extra)) = map.get("metadata") {
        for (key, value) in extra {
            input.metadata.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in map {
        if !is_schema_key(key) && !value.is_null() {
            input.metadata.insert(key.clone(), value.clone());
        }
    }

    let ranges = normalize_address_space(map);
    if let Some(first) = ranges.first() {
        input.metadata.insert("cidrBlock".to_string(), Value::String(first.clone()));
    }
    if ranges.len() > 1 {
        input.metadata.insert(
            "cidrBlocks".to_string(),
            Value::Array(ranges.into_iter().map(Value::String).collect()),
        );
    }

    Ok(input)
}

fn is_schema_key(key: &str) -> bool {
    key == "metadata"
        || [
            NATIVE_ID_KEYS,
            RESOURCE_TYPE_KEYS,
            NAME_KEYS,
            REGION_KEYS,
            ACCOUNT_KEYS,
            STATUS_KEYS,
            TAG_KEYS,
            COST_KEYS,
            OWNER_KEYS,
            CREATED_KEYS,
            ADDRESS_KEYS,
        ]
        .iter()
        .any(|keys| keys.contains(&key))
}

fn first_value<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k).filter(|v| !v.is_null()))
}

fn first_str<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| map.get(*k).and_then(Value::as_str))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
