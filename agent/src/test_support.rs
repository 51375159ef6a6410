//! In-memory doubles for the cluster and LLM seams, plus k8s object builders
//! shared across test modules.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, ReplicaSet};
use k8s_openapi::api::core::v1::{
    Container, ContainerState, ContainerStateTerminated, ContainerStateWaiting, ContainerStatus,
    Node, NodeCondition, NodeSpec, NodeStatus, Pod, PodSpec, PodStatus, PodTemplateSpec,
    ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use serde_json::{Value, json};

use crate::cluster::{ClusterOps, PodEvent};
use crate::error::AgentError;
use crate::llm::{Llm, ToolCall};
use crate::models::{Alert, ResultRecord};
use crate::tools::ToolName;

// =============================================================================
// Mock cluster
// =============================================================================

#[derive(Default)]
pub struct MockCluster {
    pods: Mutex<HashMap<(String, String), Pod>>,
    events: Mutex<HashMap<(String, String), Vec<PodEvent>>>,
    failing_events: Mutex<HashSet<(String, String)>>,
    nodes: Mutex<HashMap<String, Node>>,
    node_pods: Mutex<HashMap<String, Vec<Pod>>>,
    replicasets: Mutex<HashMap<(String, String), ReplicaSet>>,
    deployments: Mutex<HashMap<(String, String), Deployment>>,
    failing_evictions: Mutex<HashSet<String>>,
    mutations: Mutex<Vec<String>>,
}

fn not_found(kind: &str, name: &str) -> AgentError {
    AgentError::ClusterApi {
        message: format!("{} \"{}\" not found", kind, name),
        retryable: false,
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pod(self, pod: Pod) -> Self {
        let key = (
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        self.pods.lock().unwrap().insert(key, pod);
        self
    }

    pub fn with_events(self, namespace: &str, pod: &str, events: Vec<(&str, &str, &str)>) -> Self {
        let events = events
            .into_iter()
            .map(|(reason, message, kind)| PodEvent {
                reason: reason.to_string(),
                message: message.to_string(),
                kind: kind.to_string(),
                count: 1,
            })
            .collect();
        self.events
            .lock()
            .unwrap()
            .insert((namespace.to_string(), pod.to_string()), events);
        self
    }

    pub fn with_failing_events(self, namespace: &str, pod: &str) -> Self {
        self.failing_events
            .lock()
            .unwrap()
            .insert((namespace.to_string(), pod.to_string()));
        self
    }

    pub fn with_node(self, node: Node) -> Self {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.nodes.lock().unwrap().insert(name, node);
        self
    }

    pub fn with_node_pods(self, node: &str, pods: Vec<Pod>) -> Self {
        self.node_pods
            .lock()
            .unwrap()
            .insert(node.to_string(), pods);
        self
    }

    pub fn with_replicaset(self, namespace: &str, name: &str, deploy_owner: Option<&str>) -> Self {
        let rs = ReplicaSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                owner_references: deploy_owner.map(|d| {
                    vec![OwnerReference {
                        api_version: "apps/v1".into(),
                        kind: "Deployment".into(),
                        name: d.to_string(),
                        uid: "uid-deploy".into(),
                        controller: Some(true),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        self.replicasets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), rs);
        self
    }

    pub fn with_deployment(self, deployment: Deployment) -> Self {
        let key = (
            deployment.metadata.namespace.clone().unwrap_or_default(),
            deployment.metadata.name.clone().unwrap_or_default(),
        );
        self.deployments.lock().unwrap().insert(key, deployment);
        self
    }

    pub fn with_failing_eviction(self, pod: &str) -> Self {
        self.failing_evictions
            .lock()
            .unwrap()
            .insert(pod.to_string());
        self
    }

    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    fn record(&self, mutation: String) {
        self.mutations.lock().unwrap().push(mutation);
    }
}

#[async_trait]
impl ClusterOps for MockCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, AgentError> {
        self.pods
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found("pods", name))
    }

    async fn pod_events(&self, namespace: &str, name: &str) -> Result<Vec<PodEvent>, AgentError> {
        let key = (namespace.to_string(), name.to_string());
        if self.failing_events.lock().unwrap().contains(&key) {
            return Err(AgentError::ClusterApi {
                message: "events list failed".into(),
                retryable: true,
            });
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_node(&self, name: &str) -> Result<Node, AgentError> {
        self.nodes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("nodes", name))
    }

    async fn pods_on_node(&self, node: &str) -> Result<Vec<Pod>, AgentError> {
        Ok(self
            .node_pods
            .lock()
            .unwrap()
            .get(node)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_replicaset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReplicaSet, AgentError> {
        self.replicasets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found("replicasets", name))
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, AgentError> {
        self.deployments
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found("deployments", name))
    }

    async fn patch_deployment_image(
        &self,
        namespace: &str,
        deployment: &str,
        container: &str,
        image: &str,
    ) -> Result<(), AgentError> {
        self.record(format!(
            "patch_image:{}/{}/{}:{}",
            namespace, deployment, container, image
        ));
        Ok(())
    }

    async fn patch_deployment_memory_limit(
        &self,
        namespace: &str,
        deployment: &str,
        container: &str,
        limit: &str,
    ) -> Result<(), AgentError> {
        self.record(format!(
            "patch_memory:{}/{}/{}:{}",
            namespace, deployment, container, limit
        ));
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), AgentError> {
        self.record(format!("delete_pod:{}/{}", namespace, name));
        Ok(())
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), AgentError> {
        if self.failing_evictions.lock().unwrap().contains(name) {
            return Err(AgentError::ClusterApi {
                message: format!("cannot evict {}: disruption budget", name),
                retryable: true,
            });
        }
        self.record(format!("evict:{}/{}", namespace, name));
        Ok(())
    }

    async fn set_node_unschedulable(&self, name: &str, flag: bool) -> Result<(), AgentError> {
        let verb = if flag { "cordon" } else { "uncordon" };
        self.record(format!("{}:{}", verb, name));
        Ok(())
    }
}

// =============================================================================
// Mock adjudicator
// =============================================================================

enum LlmScript {
    EchoExpected,
    WrongTool(&'static str),
    Fail,
    /// Cancels the scope during the N-th adjudication, mimicking a webhook
    /// caller that disconnects while a step is in flight.
    CancelDuring {
        remaining: Mutex<usize>,
        token: tokio_util::sync::CancellationToken,
    },
}

pub struct MockLlm {
    script: LlmScript,
    arguments: Value,
}

impl MockLlm {
    /// Returns the expected tool with empty arguments, so the engine falls
    /// back to label-derived defaults.
    pub fn echo() -> Self {
        MockLlm {
            script: LlmScript::EchoExpected,
            arguments: json!({}),
        }
    }

    pub fn wrong_tool(name: &'static str) -> Self {
        MockLlm {
            script: LlmScript::WrongTool(name),
            arguments: json!({}),
        }
    }

    pub fn failing() -> Self {
        MockLlm {
            script: LlmScript::Fail,
            arguments: json!({}),
        }
    }

    pub fn cancelling_during(call: usize, token: tokio_util::sync::CancellationToken) -> Self {
        MockLlm {
            script: LlmScript::CancelDuring {
                remaining: Mutex::new(call),
                token,
            },
            arguments: json!({}),
        }
    }
}

#[async_trait]
impl Llm for MockLlm {
    async fn adjudicate(
        &self,
        _alert: &Alert,
        _tool_results: &HashMap<String, ResultRecord>,
        expected: ToolName,
    ) -> Result<ToolCall, AgentError> {
        match &self.script {
            LlmScript::EchoExpected => Ok(ToolCall {
                name: expected.wire_name().to_string(),
                arguments: self.arguments.clone(),
            }),
            LlmScript::WrongTool(name) => Ok(ToolCall {
                name: name.to_string(),
                arguments: self.arguments.clone(),
            }),
            LlmScript::Fail => Err(AgentError::Llm("mock adjudicator down".into())),
            LlmScript::CancelDuring { remaining, token } => {
                let mut rem = remaining.lock().unwrap();
                if *rem <= 1 {
                    token.cancel();
                } else {
                    *rem -= 1;
                }
                Ok(ToolCall {
                    name: expected.wire_name().to_string(),
                    arguments: self.arguments.clone(),
                })
            }
        }
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String, AgentError> {
        match &self.script {
            LlmScript::Fail => Err(AgentError::Llm("mock adjudicator down".into())),
            _ => Ok("## Summary\n\nStub analysis.".to_string()),
        }
    }
}

// =============================================================================
// Object builders
// =============================================================================

fn pod_meta(namespace: &str, name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn owned_by(mut pod: Pod, kind: &str, owner: &str) -> Pod {
    let reference = OwnerReference {
        api_version: "apps/v1".into(),
        kind: kind.to_string(),
        name: owner.to_string(),
        uid: "uid-owner".into(),
        controller: Some(true),
        ..Default::default()
    };
    pod.metadata
        .owner_references
        .get_or_insert_with(Vec::new)
        .push(reference);
    pod
}

pub fn pod_with_owner(namespace: &str, name: &str, owner: Option<(&str, &str)>) -> Pod {
    let pod = pod_meta(namespace, name);
    match owner {
        Some((kind, owner_name)) => owned_by(pod, kind, owner_name),
        None => pod,
    }
}

pub fn pod_waiting(
    namespace: &str,
    name: &str,
    container: &str,
    reason: &str,
    message: &str,
) -> Pod {
    let state = if reason.is_empty() {
        ContainerState::default()
    } else {
        ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                message: Some(message.to_string()),
            }),
            ..Default::default()
        }
    };
    let mut pod = pod_meta(namespace, name);
    pod.status = Some(PodStatus {
        container_statuses: Some(vec![ContainerStatus {
            name: container.to_string(),
            state: Some(state),
            ..Default::default()
        }]),
        ..Default::default()
    });
    pod
}

pub fn pod_with_oom_exit(namespace: &str, name: &str, container: &str, exit_code: i32) -> Pod {
    let mut pod = pod_meta(namespace, name);
    pod.status = Some(PodStatus {
        container_statuses: Some(vec![ContainerStatus {
            name: container.to_string(),
            last_state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    reason: Some("OOMKilled".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    });
    pod
}

pub fn pod_on_node(namespace: &str, name: &str, node: &str, owner_kind: Option<&str>) -> Pod {
    let mut pod = pod_meta(namespace, name);
    pod.spec = Some(PodSpec {
        node_name: Some(node.to_string()),
        ..Default::default()
    });
    match owner_kind {
        Some(kind) => owned_by(pod, kind, "owner"),
        None => pod,
    }
}

pub fn node_with_conditions(
    name: &str,
    ready: bool,
    unschedulable: bool,
    extra: &[(&str, &str)],
) -> Node {
    let mut conditions = vec![NodeCondition {
        type_: "Ready".into(),
        status: if ready { "True" } else { "False" }.into(),
        ..Default::default()
    }];
    for (type_, status) in extra {
        conditions.push(NodeCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        });
    }
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            unschedulable: Some(unschedulable),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            conditions: Some(conditions),
            ..Default::default()
        }),
    }
}

/// Deployment with the given containers as `(name, memory_limit, image)`.
pub fn deployment_with(
    namespace: &str,
    name: &str,
    containers: &[(&str, Option<&str>, &str)],
) -> Deployment {
    let containers = containers
        .iter()
        .map(|(cname, limit, image)| Container {
            name: cname.to_string(),
            image: Some(image.to_string()),
            resources: limit.map(|l| ResourceRequirements {
                limits: Some(BTreeMap::from([(
                    "memory".to_string(),
                    Quantity(l.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers,
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn plain_alert(alertname: &str, labels: &[(&str, &str)]) -> Alert {
    let mut map: HashMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    map.insert("alertname".into(), alertname.to_string());
    Alert {
        alertname: alertname.to_string(),
        labels: map,
        annotations: HashMap::new(),
        starts_at: None,
        fingerprint: None,
        group_key: None,
        status: "firing".into(),
    }
}
