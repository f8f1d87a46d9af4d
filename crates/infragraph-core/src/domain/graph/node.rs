//! Graph nodes: discovered cloud resources
//!
//! A node is a single resource normalized into the common schema. Its id is a
//! pure function of `provider:account:region:resourceType:nativeId`, which makes
//! it the dedup key across sync cycles.

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cloud provider a resource was discovered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
    Kubernetes,
    Custom,
}

impl CloudProvider {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
            Self::Kubernetes => "kubernetes",
            Self::Custom => "custom",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "aws" | "amazon" => Some(Self::Aws),
            "azure" | "microsoft" => Some(Self::Azure),
            "gcp" | "google" => Some(Self::Gcp),
            "kubernetes" | "k8s" => Some(Self::Kubernetes),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Names a tag value or resource name may use to refer to this provider
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Aws => &["aws", "amazon"],
            Self::Azure => &["azure", "microsoft"],
            Self::Gcp => &["gcp", "google"],
            Self::Kubernetes => &["kubernetes", "k8s"],
            Self::Custom => &[],
        }
    }

    /// Get all providers
    pub fn all() -> &'static [CloudProvider] {
        &[Self::Aws, Self::Azure, Self::Gcp, Self::Kubernetes, Self::Custom]
    }
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed set of resource types the graph understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    Vpc,
    Vnet,
    Network,
    Subnet,
    SecurityGroup,
    NetworkInterface,
    LoadBalancer,
    DnsZone,
    DnsRecord,
    Instance,
    Container,
    Pod,
    Deployment,
    Service,
    Namespace,
    Cluster,
    Function,
    Database,
    Cache,
    Storage,
    Queue,
    Topic,
    Stream,
    IamRole,
    IdentityPool,
    ServiceAccount,
    Secret,
    ApiGateway,
    Cdn,
    Certificate,
    Custom,
}

impl ResourceType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vpc => "vpc",
            Self::Vnet => "vnet",
            Self::Network => "network",
            Self::Subnet => "subnet",
            Self::SecurityGroup => "security-group",
            Self::NetworkInterface => "network-interface",
            Self::LoadBalancer => "load-balancer",
            Self::DnsZone => "dns-zone",
            Self::DnsRecord => "dns-record",
            Self::Instance => "instance",
            Self::Container => "container",
            Self::Pod => "pod",
            Self::Deployment => "deployment",
            Self::Service => "service",
            Self::Namespace => "namespace",
            Self::Cluster => "cluster",
            Self::Function => "function",
            Self::Database => "database",
            Self::Cache => "cache",
            Self::Storage => "storage",
            Self::Queue => "queue",
            Self::Topic => "topic",
            Self::Stream => "stream",
            Self::IamRole => "iam-role",
            Self::IdentityPool => "identity-pool",
            Self::ServiceAccount => "service-account",
            Self::Secret => "secret",
            Self::ApiGateway => "api-gateway",
            Self::Cdn => "cdn",
            Self::Certificate => "certificate",
            Self::Custom => "custom",
        }
    }

    /// Parse from string, accepting a few common vendor spellings
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "vpc" => Some(Self::Vpc),
            "vnet" | "virtual-network" => Some(Self::Vnet),
            "network" => Some(Self::Network),
            "subnet" | "subnetwork" => Some(Self::Subnet),
            "security-group" | "nsg" | "firewall" => Some(Self::SecurityGroup),
            "network-interface" | "eni" | "nic" => Some(Self::NetworkInterface),
            "load-balancer" | "lb" | "elb" | "alb" => Some(Self::LoadBalancer),
            "dns-zone" | "hosted-zone" => Some(Self::DnsZone),
            "dns-record" => Some(Self::DnsRecord),
            "instance" | "vm" | "ec2" => Some(Self::Instance),
            "container" => Some(Self::Container),
            "pod" => Some(Self::Pod),
            "deployment" => Some(Self::Deployment),
            "service" => Some(Self::Service),
            "namespace" => Some(Self::Namespace),
            "cluster" => Some(Self::Cluster),
            "function" | "lambda" => Some(Self::Function),
            "database" | "rds" => Some(Self::Database),
            "cache" => Some(Self::Cache),
            "storage" | "bucket" | "blob-container" | "s3" => Some(Self::Storage),
            "queue" => Some(Self::Queue),
            "topic" => Some(Self::Topic),
            "stream" => Some(Self::Stream),
            "iam-role" | "role" => Some(Self::IamRole),
            "identity-pool" | "workload-identity-pool" => Some(Self::IdentityPool),
            "service-account" => Some(Self::ServiceAccount),
            "secret" => Some(Self::Secret),
            "api-gateway" => Some(Self::ApiGateway),
            "cdn" => Some(Self::Cdn),
            "certificate" => Some(Self::Certificate),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Whether this type is a virtual network boundary
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Vpc | Self::Vnet | Self::Network)
    }

    /// Get all resource types
    pub fn all() -> &'static [ResourceType] {
        &[
            Self::Vpc,
            Self::Vnet,
            Self::Network,
            Self::Subnet,
            Self::SecurityGroup,
            Self::NetworkInterface,
            Self::LoadBalancer,
            Self::DnsZone,
            Self::DnsRecord,
            Self::Instance,
            Self::Container,
            Self::Pod,
            Self::Deployment,
            Self::Service,
            Self::Namespace,
            Self::Cluster,
            Self::Function,
            Self::Database,
            Self::Cache,
            Self::Storage,
            Self::Queue,
            Self::Topic,
            Self::Stream,
            Self::IamRole,
            Self::IdentityPool,
            Self::ServiceAccount,
            Self::Secret,
            Self::ApiGateway,
            Self::Cdn,
            Self::Certificate,
            Self::Custom,
        ]
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    Running,
    Stopped,
    Pending,
    Creating,
    Deleting,
    Deleted,
    Error,
    #[default]
    Unknown,
    /// No longer observed by discovery; the resource was likely removed
    Disappeared,
}

impl NodeStatus {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Pending => "pending",
            Self::Creating => "creating",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Error => "error",
            Self::Unknown => "unknown",
            Self::Disappeared => "disappeared",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "pending" => Some(Self::Pending),
            "creating" => Some(Self::Creating),
            "deleting" => Some(Self::Deleting),
            "deleted" => Some(Self::Deleted),
            "error" => Some(Self::Error),
            "unknown" => Some(Self::Unknown),
            "disappeared" => Some(Self::Disappeared),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compute the deterministic node id
///
/// The same components always yield the same id, independent of call order.
pub fn node_id(
    provider: CloudProvider,
    account: &str,
    region: &str,
    resource_type: ResourceType,
    native_id: &str,
) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        provider.as_str(),
        account,
        region,
        resource_type.as_str(),
        native_id
    )
}

/// A stored graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub provider: CloudProvider,
    pub resource_type: ResourceType,
    /// ARN, resource path, self-link or namespace/kind/name
    pub native_id: String,
    pub name: String,
    pub region: String,
    pub account: String,
    pub status: NodeStatus,
    pub tags: BTreeMap<String, String>,
    /// Provider-specific extension bag
    pub metadata: BTreeMap<String, Value>,
    pub cost_monthly: Option<f64>,
    pub owner: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl GraphNode {
    /// Materialize a fresh node from an input at the given time
    pub fn from_input(input: &GraphNodeInput, now: DateTime<Utc>) -> Self {
        Self {
            id: input.id(),
            provider: input.provider,
            resource_type: input.resource_type,
            native_id: input.native_id.clone(),
            name: input.name.clone(),
            region: input.region.clone(),
            account: input.account.clone(),
            status: input.status,
            tags: input.tags.clone(),
            metadata: input.metadata.clone(),
            cost_monthly: input.cost_monthly,
            owner: input.owner.clone(),
            discovered_at: now,
            created_at: input.stored_created_at(),
            updated_at: now,
            last_seen_at: now,
        }
    }

    /// Whether any input-controlled field differs from this node
    pub fn differs_from(&self, input: &GraphNodeInput) -> bool {
        self.name != input.name
            || self.status != input.status
            || self.tags != input.tags
            || self.metadata != input.metadata
            || self.cost_monthly != input.cost_monthly
            || self.owner != input.owner
            || self.created_at != input.stored_created_at()
    }

    /// Apply an input on top of this node, returning whether anything changed
    ///
    /// Scalars are overwritten and the tag/metadata maps are replaced wholesale.
    /// `updated_at` only moves when something changed; `last_seen_at` always does.
    pub fn merge_input(&mut self, input: &GraphNodeInput, now: DateTime<Utc>) -> bool {
        let changed = self.differs_from(input);
        if changed {
            self.name = input.name.clone();
            self.status = input.status;
            self.tags = input.tags.clone();
            self.metadata = input.metadata.clone();
            self.cost_monthly = input.cost_monthly;
            self.owner = input.owner.clone();
            self.created_at = input.stored_created_at();
            self.updated_at = now;
        }
        self.last_seen_at = now;
        changed
    }

    /// Metadata string value by key
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Metadata boolean flag; accepts `true` or `"true"`
    pub fn metadata_flag(&self, key: &str) -> bool {
        match self.metadata.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

/// Adapter-submitted node description
///
/// Omits every server-managed timestamp; storage owns those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNodeInput {
    pub provider: CloudProvider,
    pub resource_type: ResourceType,
    pub native_id: String,
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub cost_monthly: Option<f64>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl GraphNodeInput {
    /// Create a new node input; name defaults to the native id
    pub fn new(
        provider: CloudProvider,
        resource_type: ResourceType,
        native_id: impl Into<String>,
    ) -> Self {
        let native_id = native_id.into();
        Self {
            provider,
            resource_type,
            name: native_id.clone(),
            native_id,
            region: String::new(),
            account: String::new(),
            status: NodeStatus::Unknown,
            tags: BTreeMap::new(),
            metadata: BTreeMap::new(),
            cost_monthly: None,
            owner: None,
            created_at: None,
        }
    }

    /// Deterministic id this input maps to
    pub fn id(&self) -> String {
        node_id(
            self.provider,
            &self.account,
            &self.region,
            self.resource_type,
            &self.native_id,
        )
    }

    /// Provider creation time at the microsecond precision storage keeps
    pub fn stored_created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at.map(|at| at.trunc_subsecs(6))
    }

    /// Set the name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set region and account
    pub fn with_location(mut self, account: impl Into<String>, region: impl Into<String>) -> Self {
        self.account = account.into();
        self.region = region.into();
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Set the monthly cost
    pub fn with_cost(mut self, cost_monthly: f64) -> Self {
        self.cost_monthly = Some(cost_monthly);
        self
    }

    /// Set the owner
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}
