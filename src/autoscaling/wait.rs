use std::fmt::Debug;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::DynamicObject;
use kube::Api;
use serde::de::DeserializeOwned;
use tracing::debug;

pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },
    #[error("failed to get {what}: {error}")]
    Get { what: String, error: kube::Error },
}

/// Polls `name` every `interval` until `done` holds for it, for at most `timeout`.
/// Failing to read the object ends the wait.
pub async fn wait_for<K>(
    api: &Api<K>,
    name: &str,
    what: &str,
    timeout: Duration,
    interval: Duration,
    done: impl Fn(&K) -> bool,
) -> Result<K, WaitError>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug,
{
    let poll = async {
        loop {
            let obj = api.get(name).await.map_err(|error| WaitError::Get {
                what: what.to_string(),
                error,
            })?;
            if done(&obj) {
                return Ok(obj);
            }
            debug!(name, what, "condition not met yet");
            tokio::time::sleep(interval).await;
        }
    };
    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| WaitError::Timeout {
            what: what.to_string(),
            timeout,
        })?
}

pub fn ready_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

pub fn ingress_address(ingress: &Ingress) -> Option<String> {
    let lb = ingress.status.as_ref()?.load_balancer.as_ref()?;
    let first = lb.ingress.as_ref()?.first()?;
    first.hostname.clone().or_else(|| first.ip.clone())
}

pub fn routegroup_address(routegroup: &DynamicObject) -> Option<String> {
    let first = routegroup
        .data
        .pointer("/status/loadBalancer/routegroup/0")?;
    first
        .get("hostname")
        .or_else(|| first.get("ip"))
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

pub async fn wait_for_replicas(
    api: &Api<Deployment>,
    name: &str,
    replicas: i32,
    timeout: Duration,
) -> Result<Deployment, WaitError> {
    let what = format!("deployment {name} to have {replicas} ready replicas");
    wait_for(api, name, &what, timeout, POLL_INTERVAL, |d| {
        ready_replicas(d) == replicas
    })
    .await
}

pub async fn wait_for_ingress_address(
    api: &Api<Ingress>,
    name: &str,
    timeout: Duration,
) -> Result<String, WaitError> {
    let what = format!("ingress {name} to get an address");
    let ingress = wait_for(api, name, &what, timeout, POLL_INTERVAL, |i| {
        ingress_address(i).is_some()
    })
    .await?;
    Ok(ingress_address(&ingress).unwrap_or_default())
}

pub async fn wait_for_routegroup(
    api: &Api<DynamicObject>,
    name: &str,
    timeout: Duration,
) -> Result<String, WaitError> {
    let what = format!("routegroup {name} to get an address");
    let rg = wait_for(api, name, &what, timeout, POLL_INTERVAL, |rg| {
        routegroup_address(rg).is_some()
    })
    .await?;
    Ok(routegroup_address(&rg).unwrap_or_default())
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentStatus;
    use k8s_openapi::api::networking::v1::{
        IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressStatus,
    };

    #[test]
    fn test_ready_replicas() {
        let tests = [
            (None, 0),
            (Some(DeploymentStatus::default()), 0),
            (
                Some(DeploymentStatus {
                    ready_replicas: Some(2),
                    replicas: Some(3),
                    ..Default::default()
                }),
                2,
            ),
        ];
        for (status, expected) in tests {
            let deployment = Deployment {
                status,
                ..Default::default()
            };
            assert_eq!(ready_replicas(&deployment), expected);
        }
    }

    #[test]
    fn test_ingress_address() {
        let with = |ingress: Option<Vec<IngressLoadBalancerIngress>>| Ingress {
            status: Some(IngressStatus {
                load_balancer: Some(IngressLoadBalancerStatus { ingress }),
            }),
            ..Default::default()
        };
        assert_eq!(ingress_address(&Ingress::default()), None);
        assert_eq!(ingress_address(&with(Some(vec![]))), None);
        assert_eq!(
            ingress_address(&with(Some(vec![IngressLoadBalancerIngress {
                hostname: Some("lb.example.org".to_string()),
                ..Default::default()
            }]))),
            Some("lb.example.org".to_string())
        );
        assert_eq!(
            ingress_address(&with(Some(vec![IngressLoadBalancerIngress {
                ip: Some("10.0.0.1".to_string()),
                ..Default::default()
            }]))),
            Some("10.0.0.1".to_string())
        );
    }

    #[test]
    fn test_routegroup_address() {
        let rg = |data: serde_json::Value| {
            DynamicObject::new("sample", &crate::autoscaling::routegroup_resource()).data(data)
        };
        assert_eq!(routegroup_address(&rg(serde_json::json!({"spec": {}}))), None);
        assert_eq!(
            routegroup_address(&rg(serde_json::json!({
                "status": {"loadBalancer": {"routegroup": []}}
            }))),
            None
        );
        assert_eq!(
            routegroup_address(&rg(serde_json::json!({
                "status": {"loadBalancer": {"routegroup": [{"hostname": "lb.example.org"}]}}
            }))),
            Some("lb.example.org".to_string())
        );
    }
}
