use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Namespace, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::api::{DeleteParams, DynamicObject, PostParams};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::util::string_map;

mod manifests;
mod wait;

pub use manifests::*;
pub use wait::*;

pub const DEPLOYMENT_NAME: &str = "sample-custom-metrics-autoscaling-e2e";

const REPLICAS_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const ADDRESS_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, thiserror::Error)]
pub enum AutoscalingError {
    #[error("failed to create {kind} {name}: {error}")]
    Create {
        kind: String,
        name: String,
        error: kube::Error,
    },
    #[error("failed to create namespace with prefix {prefix}: {error}")]
    Namespace { prefix: String, error: kube::Error },
    #[error(transparent)]
    Wait(#[from] WaitError),
}

/// A deployment that is expected to move from `initial_replicas` to
/// `scaled_replicas` once `hpa` acts on its custom metric.
///
/// `service` is created together with whichever of `ingress` or `routegroup` is set.
#[derive(Debug, Clone)]
pub struct CustomMetricTestCase {
    pub deployment: Deployment,
    pub initial_replicas: i32,
    pub scaled_replicas: i32,
    pub hpa: HorizontalPodAutoscaler,
    pub ingress: Option<Ingress>,
    pub routegroup: Option<DynamicObject>,
    pub service: Option<Service>,
    pub aux_deployments: Vec<Deployment>,
}

async fn create<K>(api: &Api<K>, obj: &K) -> Result<K, AutoscalingError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
    K::DynamicType: Default,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    api.create(&PostParams::default(), obj)
        .await
        .map_err(|error| AutoscalingError::Create {
            kind,
            name: obj.name_any(),
            error,
        })
}

impl CustomMetricTestCase {
    #[instrument(skip_all, fields(namespace = namespace, deployment = %self.deployment.name_any()))]
    pub async fn run(&self, client: &kube::Client, namespace: &str) -> Result<(), AutoscalingError> {
        let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
        let name = self.deployment.name_any();

        create(&deployments, &self.deployment).await?;
        wait_for_replicas(&deployments, &name, self.initial_replicas, REPLICAS_TIMEOUT).await?;

        for aux in &self.aux_deployments {
            create(&deployments, aux).await?;
            let replicas = aux.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            wait_for_replicas(&deployments, &aux.name_any(), replicas, REPLICAS_TIMEOUT).await?;
        }

        let services: Api<Service> = Api::namespaced(client.clone(), namespace);
        if let Some(ingress) = &self.ingress {
            if let Some(service) = &self.service {
                create(&services, service).await?;
            }
            let ingresses: Api<Ingress> = Api::namespaced(client.clone(), namespace);
            let created = create(&ingresses, ingress).await?;
            let address =
                wait_for_ingress_address(&ingresses, &created.name_any(), ADDRESS_TIMEOUT).await?;
            info!(address, "ingress is ready");
        }

        if let Some(routegroup) = &self.routegroup {
            if let Some(service) = &self.service {
                create(&services, service).await?;
            }
            let routegroups: Api<DynamicObject> =
                Api::namespaced_with(client.clone(), namespace, &routegroup_resource());
            let created = routegroups
                .create(&PostParams::default(), routegroup)
                .await
                .map_err(|error| AutoscalingError::Create {
                    kind: "RouteGroup".to_string(),
                    name: routegroup.name_any(),
                    error,
                })?;
            let address =
                wait_for_routegroup(&routegroups, &created.name_any(), ADDRESS_TIMEOUT).await?;
            info!(address, "routegroup is ready");
        }

        let hpas: Api<HorizontalPodAutoscaler> = Api::namespaced(client.clone(), namespace);
        create(&hpas, &self.hpa).await?;

        wait_for_replicas(&deployments, &name, self.scaled_replicas, REPLICAS_TIMEOUT).await?;
        Ok(())
    }

    /// Deletes the scaled deployment. Failures are only logged.
    pub async fn cleanup(&self, client: &kube::Client, namespace: &str) {
        let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
        let name = self.deployment.name_any();
        if let Err(error) = deployments.delete(&name, &DeleteParams::default()).await {
            warn!(name, namespace, %error, "failed to delete deployment");
        }
    }
}

/// Creates a fresh namespace named after `prefix`, enforcing the baseline pod security level.
pub async fn create_namespace(client: &kube::Client, prefix: &str) -> Result<String, AutoscalingError> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: metav1::ObjectMeta {
            generate_name: Some(format!("{prefix}-")),
            labels: Some(string_map([(
                "pod-security.kubernetes.io/enforce",
                "baseline",
            )])),
            ..Default::default()
        },
        ..Default::default()
    };
    let created = namespaces
        .create(&PostParams::default(), &ns)
        .await
        .map_err(|error| AutoscalingError::Namespace {
            prefix: prefix.to_string(),
            error,
        })?;
    Ok(created.name_any())
}

pub async fn delete_namespace(client: &kube::Client, namespace: &str) {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    if let Err(error) = namespaces.delete(namespace, &DeleteParams::default()).await {
        warn!(namespace, %error, "failed to delete namespace");
    }
}

/// The hostname under which the load test of one scenario reaches the sample app.
///
/// Every scenario gets its own host, so load left over from an earlier scenario
/// never counts towards the metric of a later one.
pub fn e2e_hostname(hosted_zone: &str, unix_seconds: u64, scenario: usize) -> String {
    format!("{DEPLOYMENT_NAME}-{unix_seconds}-{scenario}.{hosted_zone}")
}

fn scale_down(deployment: Deployment, hpa: HorizontalPodAutoscaler) -> CustomMetricTestCase {
    CustomMetricTestCase {
        deployment,
        initial_replicas: 2,
        scaled_replicas: 1,
        hpa,
        ingress: None,
        routegroup: None,
        service: None,
        aux_deployments: Vec::new(),
    }
}

/// A scale-down case for the HTTP sample app behind a service, loaded by vegeta on `host`.
fn requests_per_second(host: &str, rate: i32, hpa: HorizontalPodAutoscaler) -> CustomMetricTestCase {
    let labels = app_labels(DEPLOYMENT_NAME);
    CustomMetricTestCase {
        service: Some(cluster_ip_service(DEPLOYMENT_NAME, labels, 80, SAMPLE_APP_PORT)),
        aux_deployments: vec![vegeta_deployment(&format!("{host}/metrics"), rate)],
        ..scale_down(simple_pod_deployment(DEPLOYMENT_NAME, 2), hpa)
    }
}

/// The custom metric autoscaling scenarios, each scaling the sample app from two replicas down to one.
pub fn custom_metric_scenarios(
    hosted_zone: &str,
    unix_seconds: u64,
) -> Vec<(String, CustomMetricTestCase)> {
    let metric_value = 10;
    let metric_target = metric_value * 2;
    let rate = metric_value as i32;
    let host = |scenario| e2e_hostname(hosted_zone, unix_seconds, scenario);

    let ingress_host = host(1);
    let ingress = ingress(
        DEPLOYMENT_NAME,
        &ingress_host,
        "/",
        "Prefix",
        app_labels(DEPLOYMENT_NAME),
        None,
        80,
    );
    let ingress_hpa = rps_based_hpa(
        DEPLOYMENT_NAME,
        &ingress.name_any(),
        "networking.k8s.io/v1",
        "Ingress",
        metric_target,
    );

    let rg_host = host(2);
    let rg = routegroup(DEPLOYMENT_NAME, &rg_host, app_labels(DEPLOYMENT_NAME), None, 80);
    let rg_hpa = rps_based_hpa(
        DEPLOYMENT_NAME,
        &rg.name_any(),
        "zalando.org/v1",
        "RouteGroup",
        metric_target,
    );

    let external_host = host(3);
    let external_rg = routegroup(DEPLOYMENT_NAME, &external_host, app_labels(DEPLOYMENT_NAME), None, 80);
    let external_hpa = external_rps_hpa(DEPLOYMENT_NAME, &external_host, "100", metric_target);

    vec![
        (
            "should scale down with Custom Metric of type Pod from kube-metrics-adapter".to_string(),
            scale_down(
                simple_pod_metric_deployment(DEPLOYMENT_NAME, 2, "queue-count", metric_value),
                simple_pod_metric_hpa(DEPLOYMENT_NAME, "queue-count", metric_target),
            ),
        ),
        (
            "should scale down with Custom Metric of type Object from Skipper [Ingress]".to_string(),
            CustomMetricTestCase {
                ingress: Some(ingress),
                ..requests_per_second(&ingress_host, rate, ingress_hpa)
            },
        ),
        (
            "should scale down with Custom Metric of type Object from Skipper [RouteGroup]".to_string(),
            CustomMetricTestCase {
                routegroup: Some(rg),
                ..requests_per_second(&rg_host, rate, rg_hpa)
            },
        ),
        (
            "should scale with external metric based on hostname RPS".to_string(),
            CustomMetricTestCase {
                routegroup: Some(external_rg),
                ..requests_per_second(&external_host, rate, external_hpa)
            },
        ),
    ]
}

/// Keeps the scenarios whose name contains `filter`, or all of them without one.
pub fn select_scenarios(
    scenarios: Vec<(String, CustomMetricTestCase)>,
    filter: Option<&str>,
) -> Vec<(String, CustomMetricTestCase)> {
    match filter {
        Some(pattern) => scenarios
            .into_iter()
            .filter(|(name, _)| name.contains(pattern))
            .collect(),
        None => scenarios,
    }
}
