//! Pre-flight checks before tearing a node down.
//!
//! Uninstall and upgrade refuse to touch a node that still runs workloads or
//! can still receive them.

use crate::command::{CommandRunner, CommandSpec};
use crate::config::Skip;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, Span};

#[async_trait]
pub trait NodeValidator: Send + Sync {
    /// No pods other than DaemonSet pods are scheduled on the node
    async fn ensure_drained(&self, node_name: &str) -> Result<()>;

    async fn ensure_cordoned(&self, node_name: &str) -> Result<()>;
}

/// Run the checks not listed in `skip`
pub async fn run_preflight(
    validator: &dyn NodeValidator,
    node_name: &str,
    skip: &HashSet<Skip>,
    log: &Span,
) -> Result<()> {
    if skip.contains(&Skip::PodValidation) {
        info!(parent: log, "Skipping pod validation");
    } else {
        info!(parent: log, node_name, "Validating node has no workload pods");
        validator.ensure_drained(node_name).await?;
    }

    if skip.contains(&Skip::NodeValidation) {
        info!(parent: log, "Skipping node validation");
    } else {
        info!(parent: log, node_name, "Validating node is cordoned");
        validator.ensure_cordoned(node_name).await?;
    }
    Ok(())
}

// ============================================================================
// kubectl
// ============================================================================

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: ObjectMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    owner_references: Vec<OwnerReference>,
}

#[derive(Debug, Deserialize)]
struct OwnerReference {
    kind: String,
}

#[derive(Debug, Deserialize)]
struct Node {
    #[serde(default)]
    spec: NodeSpec,
}

#[derive(Debug, Default, Deserialize)]
struct NodeSpec {
    #[serde(default)]
    unschedulable: bool,
}

/// Queries the API server with the node's own kubeconfig
pub struct KubectlValidator {
    runner: Arc<dyn CommandRunner>,
    kubectl: PathBuf,
    kubeconfig: PathBuf,
}

impl KubectlValidator {
    pub fn new(runner: Arc<dyn CommandRunner>, kubectl: PathBuf, kubeconfig: PathBuf) -> Self {
        Self {
            runner,
            kubectl,
            kubeconfig,
        }
    }

    async fn get_json(&self, args: &[&str]) -> Result<String> {
        let kubeconfig = format!("--kubeconfig={}", self.kubeconfig.display());
        let spec = CommandSpec::new(self.kubectl.display().to_string())
            .arg(kubeconfig)
            .args(args.iter().copied())
            .args(["-o", "json"]);
        Ok(self.runner.run(&spec).await?.stdout)
    }
}

fn workload_pods(list: &PodList) -> Vec<String> {
    list.items
        .iter()
        .filter(|pod| {
            !pod.metadata
                .owner_references
                .iter()
                .any(|owner| owner.kind == "DaemonSet")
        })
        .map(|pod| format!("{}/{}", pod.metadata.namespace, pod.metadata.name))
        .collect()
}

#[async_trait]
impl NodeValidator for KubectlValidator {
    async fn ensure_drained(&self, node_name: &str) -> Result<()> {
        let selector = format!("--field-selector=spec.nodeName={}", node_name);
        let out = self
            .get_json(&["get", "pods", "--all-namespaces", selector.as_str()])
            .await?;
        let pods = workload_pods(&serde_json::from_str(&out)?);
        if pods.is_empty() {
            return Ok(());
        }
        Err(Error::precondition(format!(
            "node {} is not drained, pods still running: {}. Drain the node or pass --skip pod-validation",
            node_name,
            pods.join(", ")
        )))
    }

    async fn ensure_cordoned(&self, node_name: &str) -> Result<()> {
        let out = self.get_json(&["get", "node", node_name]).await?;
        let node: Node = serde_json::from_str(&out)?;
        if node.spec.unschedulable {
            return Ok(());
        }
        Err(Error::precondition(format!(
            "node {} is not cordoned. Cordon the node or pass --skip node-validation",
            node_name
        )))
    }
}

// ============================================================================
// Fake Validator (Testing)
// ============================================================================

#[derive(Default)]
pub struct FakeNodeValidator {
    undrained: bool,
    uncordoned: bool,
    checks: Mutex<Vec<String>>,
}

impl FakeNodeValidator {
    /// A drained and cordoned node
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workloads(mut self) -> Self {
        self.undrained = true;
        self
    }

    pub fn uncordoned(mut self) -> Self {
        self.uncordoned = true;
        self
    }

    /// Checks run so far, as `"drained <node>"` / `"cordoned <node>"`
    pub fn checks(&self) -> Vec<String> {
        self.checks.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, check: &str, node_name: &str) {
        if let Ok(mut checks) = self.checks.lock() {
            checks.push(format!("{} {}", check, node_name));
        }
    }
}

#[async_trait]
impl NodeValidator for FakeNodeValidator {
    async fn ensure_drained(&self, node_name: &str) -> Result<()> {
        self.record("drained", node_name);
        if self.undrained {
            return Err(Error::precondition(format!("node {} is not drained", node_name)));
        }
        Ok(())
    }

    async fn ensure_cordoned(&self, node_name: &str) -> Result<()> {
        self.record("cordoned", node_name);
        if self.uncordoned {
            return Err(Error::precondition(format!("node {} is not cordoned", node_name)));
        }
        Ok(())
    }
}
