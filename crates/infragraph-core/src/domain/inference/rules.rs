//! Cross-cloud inference rules
//!
//! Each rule is a typed entry in a registry: the relationship it produces,
//! which resource types it considers on either side, and a matcher that
//! inspects one candidate pair. Matchers are pure; every tunable value comes
//! from the [`InferenceConfig`] they are handed.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use super::cidr::cidrs_from_metadata;
use crate::config::InferenceConfig;
use crate::domain::graph::{CloudProvider, GraphNode, RelationshipType, ResourceType};

/// Outcome of a matcher: every relationship the pair supports, possibly none
///
/// `Err` marks input the rule could not read.
pub type MatchResult = std::result::Result<Vec<RuleMatch>, String>;

/// Matcher signature shared by every rule
pub type Matcher = fn(&InferenceConfig, &GraphNode, &GraphNode) -> MatchResult;

/// How a rule visits node pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pairing {
    /// Both `(a, b)` and `(b, a)` are evaluated; the first node is the source
    Ordered,
    /// Each pair is evaluated once, lower node id first
    Unordered,
}

/// A successful match on `(source, target)`
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub relationship_type: RelationshipType,
    pub confidence: f64,
    /// Evidence copied into the edge metadata
    pub metadata: BTreeMap<String, Value>,
}

impl RuleMatch {
    pub fn new(relationship_type: RelationshipType, confidence: f64) -> Self {
        Self {
            relationship_type,
            confidence,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_evidence(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// One registered heuristic
#[derive(Debug, Clone)]
pub struct InferenceRule {
    pub name: &'static str,
    /// Relationship types the matcher may return
    pub relationship_types: &'static [RelationshipType],
    /// Source resource types; empty admits any
    pub source_types: &'static [ResourceType],
    /// Target resource types; empty admits any
    pub target_types: &'static [ResourceType],
    /// Allowed `(source, target)` provider pairs; empty admits any differing pair
    pub provider_pairs: &'static [(CloudProvider, CloudProvider)],
    pub pairing: Pairing,
    pub matcher: Matcher,
}

impl InferenceRule {
    pub fn admits_source(&self, node: &GraphNode) -> bool {
        self.source_types.is_empty() || self.source_types.contains(&node.resource_type)
    }

    pub fn admits_target(&self, node: &GraphNode) -> bool {
        self.target_types.is_empty() || self.target_types.contains(&node.resource_type)
    }

    /// Whether `(source, target)` is a candidate for this rule
    pub fn admits(&self, source: &GraphNode, target: &GraphNode) -> bool {
        source.provider != target.provider
            && self.admits_source(source)
            && self.admits_target(target)
            && (self.provider_pairs.is_empty()
                || self.provider_pairs.contains(&(source.provider, target.provider)))
    }
}

const NETWORK_TYPES: &[ResourceType] = &[ResourceType::Vpc, ResourceType::Vnet, ResourceType::Network];
const DNS_TYPES: &[ResourceType] = &[ResourceType::DnsZone, ResourceType::DnsRecord];

/// The built-in rules in evaluation order
pub fn default_rules() -> Vec<InferenceRule> {
    vec![
        InferenceRule {
            name: "tag-convention",
            relationship_types: &[RelationshipType::PeersWith],
            source_types: NETWORK_TYPES,
            target_types: NETWORK_TYPES,
            provider_pairs: &[],
            pairing: Pairing::Unordered,
            matcher: match_tag_convention,
        },
        InferenceRule {
            name: "cidr-overlap",
            relationship_types: &[RelationshipType::PeersWith],
            source_types: NETWORK_TYPES,
            target_types: NETWORK_TYPES,
            provider_pairs: &[],
            pairing: Pairing::Unordered,
            matcher: match_cidr_overlap,
        },
        InferenceRule {
            name: "shared-dns",
            relationship_types: &[RelationshipType::ResolvesTo],
            source_types: DNS_TYPES,
            target_types: &[],
            provider_pairs: &[],
            pairing: Pairing::Ordered,
            matcher: match_shared_dns,
        },
        InferenceRule {
            name: "federated-identity",
            relationship_types: &[RelationshipType::AuthenticatedBy],
            source_types: &[ResourceType::IamRole],
            target_types: &[ResourceType::IdentityPool],
            provider_pairs: &[],
            pairing: Pairing::Ordered,
            matcher: match_federated_identity,
        },
        InferenceRule {
            name: "workload-affinity",
            relationship_types: &[RelationshipType::DependsOn],
            source_types: &[],
            target_types: &[],
            provider_pairs: &[],
            pairing: Pairing::Unordered,
            matcher: match_workload_affinity,
        },
        InferenceRule {
            name: "storage-reference",
            relationship_types: &[RelationshipType::ReadsFrom, RelationshipType::WritesTo],
            source_types: &[],
            target_types: &[ResourceType::Storage],
            provider_pairs: &[],
            pairing: Pairing::Ordered,
            matcher: match_storage_reference,
        },
    ]
}

// ========== Tag / name convention ==========

const PEERING_NAME_HINTS: &[&str] = &["peer", "peering", "vpn", "interconnect"];

fn tokens(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `from` points at `to` through a peering tag or its name
fn references_peer(config: &InferenceConfig, from: &GraphNode, to: &GraphNode) -> Option<String> {
    for key in &config.peering_tag_keys {
        let Some(value) = from.tags.get(key) else {
            continue;
        };
        let value_tokens = tokens(value);
        let names_peer = value == &to.native_id || (!to.name.is_empty() && value == &to.name);
        let names_provider = to
            .provider
            .aliases()
            .iter()
            .any(|alias| value_tokens.iter().any(|t| t == alias));
        if names_peer || names_provider {
            return Some(format!("tag:{}", key));
        }
    }

    let name_tokens = tokens(&from.name);
    let hinted = name_tokens
        .iter()
        .any(|t| PEERING_NAME_HINTS.contains(&t.as_str()));
    let names_provider = to
        .provider
        .aliases()
        .iter()
        .any(|alias| name_tokens.iter().any(|t| t == alias));
    if hinted && names_provider {
        return Some("name".to_string());
    }
    None
}

fn match_tag_convention(config: &InferenceConfig, a: &GraphNode, b: &GraphNode) -> MatchResult {
    let via = references_peer(config, a, b).or_else(|| references_peer(config, b, a));
    Ok(via
        .map(|via| {
            RuleMatch::new(RelationshipType::PeersWith, config.tag_convention_confidence)
                .with_evidence("matchedOn", Value::String(via))
        })
        .into_iter()
        .collect())
}

// ========== CIDR overlap ==========

fn match_cidr_overlap(config: &InferenceConfig, a: &GraphNode, b: &GraphNode) -> MatchResult {
    let left = cidrs_from_metadata(a)?;
    let right = cidrs_from_metadata(b)?;
    for l in &left {
        if let Some(r) = right.iter().find(|r| l.overlaps(r)) {
            return Ok(vec![
                RuleMatch::new(RelationshipType::PeersWith, config.cidr_overlap_confidence)
                    .with_evidence("crossCloud", Value::Bool(true))
                    .with_evidence("sourceCidr", Value::String(l.to_string()))
                    .with_evidence("targetCidr", Value::String(r.to_string())),
            ]);
        }
    }
    Ok(Vec::new())
}

// ========== Shared DNS ==========

const DNS_VALUE_KEYS: &[&str] = &["records", "resourceRecords", "values", "value", "target", "aliasTarget"];
const ADDRESS_KEYS: &[&str] = &[
    "dnsName",
    "hostname",
    "fqdn",
    "endpoint",
    "publicIp",
    "privateIp",
    "ipAddress",
    "ipAddresses",
];

fn normalize_host(s: &str) -> String {
    s.trim().trim_end_matches('.').to_lowercase()
}

fn dns_values(node: &GraphNode) -> std::result::Result<Vec<String>, String> {
    let mut values = Vec::new();
    for key in DNS_VALUE_KEYS {
        let Some(value) = node.metadata.get(*key) else {
            continue;
        };
        match value {
            Value::Null => {}
            Value::String(s) => values.push(normalize_host(s)),
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::String(s) => values.push(normalize_host(s)),
                        Value::Object(record) => {
                            let inner = record.get("value").or_else(|| record.get("Value"));
                            match inner.and_then(Value::as_str) {
                                Some(s) => values.push(normalize_host(s)),
                                None => return Err(format!("{} entry has no value", key)),
                            }
                        }
                        _ => return Err(format!("{} contains an unreadable entry", key)),
                    }
                }
            }
            Value::Object(record) => {
                if let Some(s) = record.get("dnsName").and_then(Value::as_str) {
                    values.push(normalize_host(s));
                }
            }
            _ => return Err(format!("{} has unexpected type", key)),
        }
    }
    values.retain(|v| !v.is_empty());
    Ok(values)
}

fn addresses(node: &GraphNode) -> Vec<String> {
    let mut out = vec![normalize_host(&node.native_id)];
    if !node.name.is_empty() {
        out.push(normalize_host(&node.name));
    }
    for key in ADDRESS_KEYS {
        match node.metadata.get(*key) {
            Some(Value::String(s)) => out.push(normalize_host(s)),
            Some(Value::Array(items)) => {
                out.extend(items.iter().filter_map(Value::as_str).map(normalize_host))
            }
            _ => {}
        }
    }
    out.retain(|v| !v.is_empty());
    out
}

fn match_shared_dns(config: &InferenceConfig, a: &GraphNode, b: &GraphNode) -> MatchResult {
    let values = dns_values(a)?;
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let targets = addresses(b);
    Ok(values
        .iter()
        .find(|v| targets.contains(v))
        .map(|hit| {
            RuleMatch::new(RelationshipType::ResolvesTo, config.dns_confidence)
                .with_evidence("record", Value::String(hit.clone()))
        })
        .into_iter()
        .collect())
}

// ========== Federated identity ==========

fn trust_text(node: &GraphNode) -> std::result::Result<Option<String>, String> {
    let mut text = String::new();
    for key in ["trustPolicy", "assumeRolePolicyDocument", "federatedPrincipals"] {
        match node.metadata.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => text.push_str(s),
            Some(value @ (Value::Object(_) | Value::Array(_))) => text.push_str(&value.to_string()),
            Some(_) => return Err(format!("{} has unexpected type", key)),
        }
        text.push('\n');
    }
    let text = text.trim().to_lowercase();
    Ok((!text.is_empty()).then_some(text))
}

fn match_federated_identity(config: &InferenceConfig, a: &GraphNode, b: &GraphNode) -> MatchResult {
    let Some(text) = trust_text(a)? else {
        return Ok(Vec::new());
    };
    let principal = config
        .principals_for(b.provider)
        .iter()
        .find(|p| text.contains(&p.to_lowercase()));
    Ok(principal
        .map(|p| {
            RuleMatch::new(RelationshipType::AuthenticatedBy, config.federated_identity_confidence)
                .with_evidence("principal", Value::String(p.clone()))
        })
        .into_iter()
        .collect())
}

// ========== Workload affinity ==========

fn optional_str<'a>(node: &'a GraphNode, key: &str) -> std::result::Result<Option<&'a str>, String> {
    match node.metadata.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim())),
        Some(_) => Err(format!("{} is not a string", key)),
    }
}

fn match_workload_affinity(config: &InferenceConfig, a: &GraphNode, b: &GraphNode) -> MatchResult {
    let class_a = optional_str(a, "workloadClass")?;
    let class_b = optional_str(b, "workloadClass")?;
    let both_ai = a.metadata_flag("aiWorkload") && b.metadata_flag("aiWorkload");
    let same_class = matches!((class_a, class_b), (Some(x), Some(y)) if x.eq_ignore_ascii_case(y));
    if !both_ai && !same_class {
        return Ok(Vec::new());
    }

    if let (Some(x), Some(y)) = (optional_str(a, "modelName")?, optional_str(b, "modelName")?) {
        if x.eq_ignore_ascii_case(y) {
            return Ok(vec![
                RuleMatch::new(RelationshipType::DependsOn, config.workload_model_confidence)
                    .with_evidence("matchedOn", json!("modelName"))
                    .with_evidence("modelName", Value::String(x.to_string())),
            ]);
        }
    }

    let owner_a = a.owner.as_deref().map(str::trim).filter(|o| !o.is_empty());
    let owner_b = b.owner.as_deref().map(str::trim).filter(|o| !o.is_empty());
    if let (Some(x), Some(y)) = (owner_a, owner_b) {
        if x.eq_ignore_ascii_case(y) {
            return Ok(vec![
                RuleMatch::new(RelationshipType::DependsOn, config.workload_owner_confidence)
                    .with_evidence("matchedOn", json!("owner"))
                    .with_evidence("owner", Value::String(x.to_string())),
            ]);
        }
    }
    Ok(Vec::new())
}

// ========== Shared storage reference ==========

const WRITER_HINTS: &[&str] = &["output", "destination", "sink", "export", "write", "target"];
const MAX_METADATA_DEPTH: usize = 4;

/// A storage location parsed from a URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRef {
    pub provider: CloudProvider,
    /// Bucket, container, filesystem or storage account names the URI mentions
    pub names: Vec<String>,
    pub uri: String,
}

/// Parse `s3://`, `gs://` and Azure blob/ADLS URIs
pub fn parse_storage_uri(raw: &str) -> Option<StorageRef> {
    let uri = raw.trim();
    let lower = uri.to_lowercase();
    let first_segment = |rest: &str| rest.split('/').next().unwrap_or("").to_string();

    if let Some(rest) = lower.strip_prefix("s3://") {
        let bucket = first_segment(rest);
        return (!bucket.is_empty()).then(|| StorageRef {
            provider: CloudProvider::Aws,
            names: vec![bucket],
            uri: uri.to_string(),
        });
    }
    if let Some(rest) = lower.strip_prefix("gs://") {
        let bucket = first_segment(rest);
        return (!bucket.is_empty()).then(|| StorageRef {
            provider: CloudProvider::Gcp,
            names: vec![bucket],
            uri: uri.to_string(),
        });
    }
    // abfss://fs@account.dfs.core.windows.net/path, wasbs://container@account.blob...
    for scheme in ["abfss://", "abfs://", "wasbs://", "wasb://"] {
        if let Some(rest) = lower.strip_prefix(scheme) {
            let authority = first_segment(rest);
            let (container, host) = authority.split_once('@')?;
            let account = host.split('.').next().unwrap_or("");
            if !host.ends_with(".core.windows.net") || account.is_empty() {
                return None;
            }
            return Some(StorageRef {
                provider: CloudProvider::Azure,
                names: vec![container.to_string(), account.to_string()],
                uri: uri.to_string(),
            });
        }
    }
    // https://account.blob.core.windows.net/container/path (and .dfs.)
    if let Some(rest) = lower.strip_prefix("https://") {
        let mut parts = rest.splitn(2, '/');
        let host = parts.next().unwrap_or("");
        let path = parts.next().unwrap_or("");
        if host.ends_with(".blob.core.windows.net") || host.ends_with(".dfs.core.windows.net") {
            let account = host.split('.').next().unwrap_or("").to_string();
            let container = first_segment(path);
            let mut names = Vec::new();
            if !container.is_empty() {
                names.push(container);
            }
            names.push(account);
            return Some(StorageRef {
                provider: CloudProvider::Azure,
                names,
                uri: uri.to_string(),
            });
        }
    }
    None
}

/// Every storage URI in a node's metadata, paired with the key it sits under
fn storage_refs(node: &GraphNode) -> Vec<(String, StorageRef)> {
    fn walk(key: &str, value: &Value, depth: usize, out: &mut Vec<(String, StorageRef)>) {
        if depth > MAX_METADATA_DEPTH {
            return;
        }
        match value {
            Value::String(s) => {
                if let Some(r) = parse_storage_uri(s) {
                    out.push((key.to_string(), r));
                }
            }
            Value::Array(items) => {
                for item in items {
                    walk(key, item, depth + 1, out);
                }
            }
            Value::Object(map) => {
                for (k, v) in map {
                    walk(k, v, depth + 1, out);
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    for (key, value) in &node.metadata {
        walk(key, value, 0, &mut out);
    }
    out
}

fn storage_names(node: &GraphNode) -> Vec<String> {
    let mut names = vec![node.native_id.to_lowercase(), node.name.to_lowercase()];
    // arn:aws:s3:::bucket and resource paths ending in the bucket name
    if let Some(last) = node
        .native_id
        .rsplit([':', '/'])
        .next()
        .filter(|s| !s.is_empty())
    {
        names.push(last.to_lowercase());
    }
    names.retain(|n| !n.is_empty());
    names
}

fn is_writer_key(key: &str) -> bool {
    let key = key.to_lowercase();
    WRITER_HINTS.iter().any(|hint| key.contains(hint))
}

fn match_storage_reference(config: &InferenceConfig, a: &GraphNode, b: &GraphNode) -> MatchResult {
    if a.resource_type == ResourceType::Storage {
        return Ok(Vec::new());
    }
    let target_names = storage_names(b);
    let hits: Vec<_> = storage_refs(a)
        .into_iter()
        .filter(|(_, r)| r.provider == b.provider && r.names.iter().any(|n| target_names.contains(n)))
        .collect();

    // One edge per direction; the first field naming the bucket is the evidence
    let reader = hits.iter().find(|(k, _)| !is_writer_key(k));
    let writer = hits.iter().find(|(k, _)| is_writer_key(k));
    Ok([
        (RelationshipType::ReadsFrom, reader),
        (RelationshipType::WritesTo, writer),
    ]
    .into_iter()
    .filter_map(|(relationship_type, hit)| {
        hit.map(|(key, reference)| {
            RuleMatch::new(relationship_type, config.storage_reference_confidence)
                .with_evidence("uri", Value::String(reference.uri.clone()))
                .with_evidence("field", Value::String(key.clone()))
        })
    })
    .collect())
}
