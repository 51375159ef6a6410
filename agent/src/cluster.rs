//! Typed wrapper over the Kubernetes control-plane API.
//!
//! The `ClusterOps` trait is the seam between the tool registry and the real
//! cluster: production uses `KubeCluster`, tests use an in-memory mock. Every
//! call carries the cluster-API deadline.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Event, Node, Pod};
use kube::Client;
use kube::api::{Api, DeleteParams, EvictParams, ListParams, Patch, PatchParams};
use serde::Serialize;
use tokio::time::timeout;

use crate::error::AgentError;

pub const CLUSTER_API_TIMEOUT: Duration = Duration::from_secs(15);

/// Flattened cluster event for a pod, enough for reason classification.
#[derive(Debug, Clone, Serialize)]
pub struct PodEvent {
    pub reason: String,
    pub message: String,
    pub kind: String,
    pub count: i32,
}

#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, AgentError>;
    async fn pod_events(&self, namespace: &str, name: &str) -> Result<Vec<PodEvent>, AgentError>;
    async fn get_node(&self, name: &str) -> Result<Node, AgentError>;
    async fn pods_on_node(&self, node: &str) -> Result<Vec<Pod>, AgentError>;
    async fn get_replicaset(&self, namespace: &str, name: &str)
    -> Result<ReplicaSet, AgentError>;
    async fn get_deployment(&self, namespace: &str, name: &str)
    -> Result<Deployment, AgentError>;

    async fn patch_deployment_image(
        &self,
        namespace: &str,
        deployment: &str,
        container: &str,
        image: &str,
    ) -> Result<(), AgentError>;

    async fn patch_deployment_memory_limit(
        &self,
        namespace: &str,
        deployment: &str,
        container: &str,
        limit: &str,
    ) -> Result<(), AgentError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), AgentError>;
    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), AgentError>;
    async fn set_node_unschedulable(&self, name: &str, flag: bool) -> Result<(), AgentError>;
}

/// Production implementation backed by the in-cluster (or kubeconfig) client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("failed to build Kubernetes client")?;
        Ok(KubeCluster { client })
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn with_deadline<T, F>(fut: F) -> Result<T, AgentError>
where
    F: std::future::Future<Output = Result<T, kube::Error>>,
{
    timeout(CLUSTER_API_TIMEOUT, fut)
        .await
        .map_err(|_| AgentError::Timeout("cluster API"))?
        .map_err(AgentError::from)
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, AgentError> {
        with_deadline(self.pods(namespace).get(name)).await
    }

    async fn pod_events(&self, namespace: &str, name: &str) -> Result<Vec<PodEvent>, AgentError> {
        let events: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().fields(&format!(
            "involvedObject.name={},involvedObject.namespace={}",
            name, namespace
        ));
        let list = with_deadline(events.list(&lp)).await?;
        Ok(list
            .items
            .into_iter()
            .map(|e| PodEvent {
                reason: e.reason.unwrap_or_default(),
                message: e.message.unwrap_or_default(),
                kind: e.type_.unwrap_or_default(),
                count: e.count.unwrap_or(0),
            })
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node, AgentError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        with_deadline(nodes.get(name)).await
    }

    async fn pods_on_node(&self, node: &str) -> Result<Vec<Pod>, AgentError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let lp = ListParams::default().fields(&format!("spec.nodeName={}", node));
        let list = with_deadline(pods.list(&lp)).await?;
        Ok(list.items)
    }

    async fn get_replicaset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReplicaSet, AgentError> {
        let sets: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        with_deadline(sets.get(name)).await
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, AgentError> {
        with_deadline(self.deployments(namespace).get(name)).await
    }

    async fn patch_deployment_image(
        &self,
        namespace: &str,
        deployment: &str,
        container: &str,
        image: &str,
    ) -> Result<(), AgentError> {
        let patch = serde_json::json!({
            "spec": { "template": { "spec": { "containers": [
                { "name": container, "image": image }
            ]}}}
        });
        with_deadline(self.deployments(namespace).patch(
            deployment,
            &PatchParams::default(),
            &Patch::Strategic(patch),
        ))
        .await
        .map(|_| ())
    }

    async fn patch_deployment_memory_limit(
        &self,
        namespace: &str,
        deployment: &str,
        container: &str,
        limit: &str,
    ) -> Result<(), AgentError> {
        let patch = serde_json::json!({
            "spec": { "template": { "spec": { "containers": [
                { "name": container, "resources": { "limits": { "memory": limit } } }
            ]}}}
        });
        with_deadline(self.deployments(namespace).patch(
            deployment,
            &PatchParams::default(),
            &Patch::Strategic(patch),
        ))
        .await
        .map(|_| ())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), AgentError> {
        with_deadline(self.pods(namespace).delete(name, &DeleteParams::default()))
            .await
            .map(|_| ())
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), AgentError> {
        with_deadline(self.pods(namespace).evict(name, &EvictParams::default()))
            .await
            .map(|_| ())
    }

    async fn set_node_unschedulable(&self, name: &str, flag: bool) -> Result<(), AgentError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "spec": { "unschedulable": flag } });
        with_deadline(nodes.patch(name, &PatchParams::default(), &Patch::Merge(patch)))
            .await
            .map(|_| ())
    }
}
