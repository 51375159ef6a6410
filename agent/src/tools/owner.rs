//! Ownership-chain resolution shared by the Deployment-mutating tools.
//!
//! Two-step walk: pod → owning ReplicaSet → owning Deployment. Anything that
//! is not reachable as a Deployment is rejected explicitly rather than
//! guessed at.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;

use crate::cluster::ClusterOps;
use crate::error::AgentError;

#[derive(Debug)]
pub struct DeploymentTarget {
    pub deployment: Deployment,
    pub name: String,
    pub container: String,
}

pub async fn resolve_deployment_target(
    cluster: &dyn ClusterOps,
    namespace: &str,
    pod_name: &str,
    container_hint: Option<&str>,
) -> Result<DeploymentTarget, AgentError> {
    let pod = cluster.get_pod(namespace, pod_name).await?;
    let owners = pod.metadata.owner_references.unwrap_or_default();

    let deploy_name = if let Some(direct) = owners.iter().find(|o| o.kind == "Deployment") {
        direct.name.clone()
    } else if let Some(rs_ref) = owners.iter().find(|o| o.kind == "ReplicaSet") {
        let rs = cluster.get_replicaset(namespace, &rs_ref.name).await?;
        rs.metadata
            .owner_references
            .unwrap_or_default()
            .into_iter()
            .find(|o| o.kind == "Deployment")
            .map(|o| o.name)
            .ok_or_else(|| {
                AgentError::OwnerResolutionFailed(format!(
                    "NotOwnedByDeployment: replicaset {}/{} has no Deployment owner",
                    namespace, rs_ref.name
                ))
            })?
    } else {
        return Err(AgentError::OwnerResolutionFailed(format!(
            "NotOwnedByDeployment: pod {}/{} has no ReplicaSet or Deployment owner",
            namespace, pod_name
        )));
    };

    let deployment = cluster.get_deployment(namespace, &deploy_name).await?;
    let container = select_container(&deployment, &deploy_name, container_hint)?;
    Ok(DeploymentTarget {
        deployment,
        name: deploy_name,
        container,
    })
}

fn pod_template_containers(deployment: &Deployment) -> &[Container] {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|ps| ps.containers.as_slice())
        .unwrap_or(&[])
}

/// Container selection: the alert's `container` label when present, the
/// single container when unambiguous, an explicit error otherwise.
pub fn select_container(
    deployment: &Deployment,
    deploy_name: &str,
    hint: Option<&str>,
) -> Result<String, AgentError> {
    let containers = pod_template_containers(deployment);
    if let Some(hint) = hint
        && !hint.is_empty()
    {
        if containers.iter().any(|c| c.name == hint) {
            return Ok(hint.to_string());
        }
        return Err(AgentError::AmbiguousContainer(format!(
            "container {} not found in deployment {}",
            hint, deploy_name
        )));
    }
    match containers {
        [only] => Ok(only.name.clone()),
        [] => Err(AgentError::AmbiguousContainer(format!(
            "deployment {} has no containers",
            deploy_name
        ))),
        _ => Err(AgentError::AmbiguousContainer(format!(
            "deployment {} has multiple containers and no container label",
            deploy_name
        ))),
    }
}

/// Reads the current memory limit of a container in the pod template, as the
/// raw quantity string.
pub fn memory_limit_of(deployment: &Deployment, container: &str) -> Option<String> {
    pod_template_containers(deployment)
        .iter()
        .find(|c| c.name == container)?
        .resources
        .as_ref()?
        .limits
        .as_ref()?
        .get("memory")
        .map(|q| q.0.clone())
}
