//! Kubernetes utility functions shared by the harness
//!
//! Condition helpers, client construction, label selector matching,
//! quantity parsing and typed/dynamic object conversion.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use kube::api::{DynamicObject, TypeMeta};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;

use tracing::debug;

use crate::crd::PoolCondition;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

// Kubernetes condition type constants
/// The "Ready" condition type for nodes
pub const CONDITION_READY: &str = "Ready";
/// Node memory pressure condition
pub const CONDITION_MEMORY_PRESSURE: &str = "MemoryPressure";
/// Node disk pressure condition
pub const CONDITION_DISK_PRESSURE: &str = "DiskPressure";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";
/// The "Unknown" status value for conditions
pub const STATUS_UNKNOWN: &str = "Unknown";
/// Label pinning a policy to a single node
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Check if a Kubernetes condition of the given type has status "True"
///
/// # Arguments
/// * `conditions` - Optional slice of conditions (e.g., from status.conditions)
/// * `condition_type` - The condition type to check (e.g., "Ready", "Updated")
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    condition_status(conditions, condition_type) == Some(STATUS_TRUE)
}

/// Status of the first condition of the given type, if present
pub fn condition_status<'a, T>(conditions: Option<&'a [T]>, condition_type: &str) -> Option<&'a str>
where
    T: HasConditionFields,
{
    conditions?
        .iter()
        .find(|c| c.type_field() == condition_type)
        .map(|c| c.status_field())
}

/// Trait for types that have condition-like fields (type, status and reason)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
    /// Get the condition reason, empty when unset
    fn reason_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::api::core::v1::NodeCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
    fn reason_field(&self) -> &str {
        self.reason.as_deref().unwrap_or_default()
    }
}

impl HasConditionFields for PoolCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
    fn reason_field(&self) -> &str {
        self.reason.as_deref().unwrap_or_default()
    }
}

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Retry budget for the first API round trip of a run
///
/// Starts at 1s rather than the default 100ms; five attempts span roughly 15s.
pub fn api_ready_retry() -> RetryConfig {
    RetryConfig {
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(8),
        ..RetryConfig::with_max_attempts(5)
    }
}

/// Wait until the API server answers a version request
pub async fn wait_for_api_ready(client: &Client, retry: &RetryConfig) -> Result<(), Error> {
    let info =
        retry_with_backoff(retry, "api-server version", || client.apiserver_version()).await?;
    debug!(version = %info.git_version, "API server reachable");
    Ok(())
}

/// One equality-based label requirement
#[derive(Clone, Debug, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals(k, v) => labels.get(k) == Some(v),
            Self::NotEquals(k, v) => labels.get(k) != Some(v),
            Self::Exists(k) => labels.contains_key(k),
            Self::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

/// Parsed equality-based label selector (`a=b,c!=d,e,!f`)
///
/// Set-based expressions (`in`, `notin`) are rejected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Parse a selector string. An empty string selects everything.
    pub fn parse(selector: &str) -> Result<Self, Error> {
        let mut requirements = Vec::new();
        for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if term.contains(char::is_whitespace) || term.contains('(') {
                return Err(Error::configuration(format!(
                    "unsupported label selector term {term:?}"
                )));
            }
            let req = if let Some((k, v)) = term.split_once("!=") {
                Requirement::NotEquals(k.to_string(), v.to_string())
            } else if let Some((k, v)) = term.split_once("==") {
                Requirement::Equals(k.to_string(), v.to_string())
            } else if let Some((k, v)) = term.split_once('=') {
                Requirement::Equals(k.to_string(), v.to_string())
            } else if let Some(k) = term.strip_prefix('!') {
                Requirement::DoesNotExist(k.to_string())
            } else {
                Requirement::Exists(term.to_string())
            };
            requirements.push(req);
        }
        Ok(Self { requirements })
    }

    /// Whether every requirement holds for the given labels
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

/// Parse a Kubernetes quantity string into a whole count, rounding down
///
/// Accepts plain integers and decimals, decimal suffixes (`k`, `M`, `G`, `T`,
/// `P`, `E`), binary suffixes (`Ki` .. `Ei`), milli units (`m`) and exponents.
pub fn parse_quantity(quantity: &str) -> Option<i64> {
    const BINARY: [(&str, f64); 6] = [
        ("Ki", 1024.0),
        ("Mi", 1_048_576.0),
        ("Gi", 1_073_741_824.0),
        ("Ti", 1_099_511_627_776.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ei", 1_152_921_504_606_846_976.0),
    ];
    const DECIMAL: [(&str, f64); 7] = [
        ("m", 1e-3),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    let q = quantity.trim();
    if q.is_empty() {
        return None;
    }
    let (number, multiplier) = BINARY
        .iter()
        .chain(DECIMAL.iter())
        .find_map(|(suffix, mult)| q.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((q, 1.0));
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some((value * multiplier).floor() as i64)
}

/// Convert a typed resource into a [`DynamicObject`]
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, Error> {
    let value = serde_json::to_value(obj)?;
    Ok(serde_json::from_value(value)?)
}

/// Convert a [`DynamicObject`] into a typed resource
///
/// List responses may omit `apiVersion`/`kind` on items, so the type
/// metadata is filled in from `K` before decoding.
pub fn from_dynamic<K>(obj: &DynamicObject) -> Result<K, Error>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let mut obj = obj.clone();
    if obj.types.is_none() {
        obj.types = Some(TypeMeta {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
        });
    }
    let value = serde_json::to_value(&obj)?;
    serde_json::from_value(value).map_err(|e| Error::serialization_for(K::kind(&()), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Node, NodeCondition};
    use kube::ResourceExt;

    #[tokio::test]
    async fn test_unreachable_api_server_fails_after_retries() {
        let mut config = Config::new("http://127.0.0.1:9".parse().unwrap());
        config.connect_timeout = Some(Duration::from_secs(1));
        let client = Client::try_from(config).unwrap();
        let retry = RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::with_max_attempts(2)
        };

        let err = wait_for_api_ready(&client, &retry).await.unwrap_err();
        assert!(matches!(err, Error::Kube { .. }));
        assert!(err.is_transient());
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn cond(type_: &str, status: &str) -> NodeCondition {
        NodeCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_has_condition() {
        let conditions = vec![cond("MemoryPressure", "False"), cond("Ready", "True")];
        assert!(has_condition(Some(conditions.as_slice()), CONDITION_READY));
        assert!(!has_condition(Some(conditions.as_slice()), CONDITION_MEMORY_PRESSURE));
        assert!(!has_condition::<NodeCondition>(None, CONDITION_READY));
        assert_eq!(
            condition_status(Some(conditions.as_slice()), CONDITION_MEMORY_PRESSURE),
            Some("False")
        );
    }

    #[test]
    fn test_label_selector_equality_terms() {
        let sel = LabelSelector::parse("node-role.kubernetes.io/worker=,zone!=b").unwrap();
        assert!(sel.matches(&labels(&[("node-role.kubernetes.io/worker", ""), ("zone", "a")])));
        assert!(!sel.matches(&labels(&[("node-role.kubernetes.io/worker", ""), ("zone", "b")])));
        assert!(!sel.matches(&labels(&[("zone", "a")])));
    }

    #[test]
    fn test_label_selector_existence_terms() {
        let sel = LabelSelector::parse("sriov, !cordoned").unwrap();
        assert!(sel.matches(&labels(&[("sriov", "x")])));
        assert!(!sel.matches(&labels(&[("sriov", "x"), ("cordoned", "")])));
        assert!(LabelSelector::parse("").unwrap().matches(&BTreeMap::new()));
        assert!(LabelSelector::parse("env in (a,b)").is_err());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("4"), Some(4));
        assert_eq!(parse_quantity("0"), Some(0));
        assert_eq!(parse_quantity("2k"), Some(2000));
        assert_eq!(parse_quantity("1Ki"), Some(1024));
        assert_eq!(parse_quantity("500m"), Some(0));
        assert_eq!(parse_quantity("1500m"), Some(1));
        assert_eq!(parse_quantity("1e3"), Some(1000));
        assert_eq!(parse_quantity(""), None);
        assert_eq!(parse_quantity("lots"), None);
    }

    #[test]
    fn test_dynamic_round_trip_fills_missing_type_meta() {
        let mut node = Node::default();
        node.metadata.name = Some("worker-0".to_string());
        node.metadata.labels = Some(labels(&[("a", "b")]));
        let mut dynamic = to_dynamic(&node).unwrap();
        assert_eq!(dynamic.name_any(), "worker-0");

        dynamic.types = None;
        let back: Node = from_dynamic(&dynamic).unwrap();
        assert_eq!(back.labels().get("a").map(String::as_str), Some("b"));
    }
}
