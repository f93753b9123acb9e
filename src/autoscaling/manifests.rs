use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, ExternalMetricSource, HorizontalPodAutoscaler,
    HorizontalPodAutoscalerSpec, MetricIdentifier, MetricSpec, MetricTarget, ObjectMetricSource,
    PodsMetricSource,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};

use crate::util::string_map;

pub const SAMPLE_APP_IMAGE: &str =
    "container-registry.zalando.net/teapot/sample-custom-metrics-autoscaling:main-5";
pub const VEGETA_IMAGE: &str = "peterevans/vegeta:6.9.1";
pub const HPA_NAME: &str = "custom-metrics-pods-hpa";
pub const SAMPLE_APP_PORT: i32 = 8000;

/// One metrics-exporter container of a pod-metric deployment.
#[derive(Debug, Clone)]
pub struct CustomMetricContainerSpec {
    pub name: String,
    pub metric_name: String,
    pub metric_value: i64,
}

pub fn app_labels(name: &str) -> BTreeMap<String, String> {
    string_map([("application", name)])
}

fn sample_app_resources() -> ResourceRequirements {
    ResourceRequirements {
        limits: Some(BTreeMap::from([(
            "memory".to_string(),
            Quantity("300Mi".to_string()),
        )])),
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("10m".to_string())),
            ("memory".to_string(), Quantity("300Mi".to_string())),
        ])),
        ..Default::default()
    }
}

fn sample_app_container(name: &str) -> Container {
    Container {
        name: name.to_string(),
        image: Some(SAMPLE_APP_IMAGE.to_string()),
        ports: Some(vec![ContainerPort {
            container_port: SAMPLE_APP_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: Some(sample_app_resources()),
        ..Default::default()
    }
}

fn deployment(name: &str, replicas: i32, containers: Vec<Container>) -> Deployment {
    Deployment {
        metadata: metav1::ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(app_labels(name)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: metav1::LabelSelector {
                match_labels: Some(app_labels(name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(metav1::ObjectMeta {
                    labels: Some(app_labels(name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A deployment whose pods expose a fixed queue length on `/metrics`.
pub fn simple_pod_metric_deployment(
    name: &str,
    replicas: i32,
    metric_name: &str,
    metric_value: i64,
) -> Deployment {
    pod_metric_deployment(
        name,
        replicas,
        &[CustomMetricContainerSpec {
            name: "metrics-exporter-e2e".to_string(),
            metric_name: metric_name.to_string(),
            metric_value,
        }],
    )
}

/// A deployment with one exporter container per metric in each pod.
pub fn pod_metric_deployment(
    name: &str,
    replicas: i32,
    containers: &[CustomMetricContainerSpec],
) -> Deployment {
    let containers = containers
        .iter()
        .map(|spec| Container {
            args: Some(vec![
                "-fake-queue-length".to_string(),
                spec.metric_value.to_string(),
            ]),
            ..sample_app_container(&spec.name)
        })
        .collect();
    deployment(name, replicas, containers)
}

/// A deployment of the sample app serving plain HTTP.
pub fn simple_pod_deployment(name: &str, replicas: i32) -> Deployment {
    deployment(name, replicas, vec![sample_app_container(name)])
}

/// A load generator sending `rate` requests per second to `target_url`.
pub fn vegeta_deployment(target_url: &str, rate: i32) -> Deployment {
    let name = "vegeta";
    let attack = format!(
        "echo 'GET http://{target_url}' | vegeta attack -rate={rate}/s -duration=0 | vegeta report -every=30s"
    );
    deployment(
        name,
        1,
        vec![Container {
            name: name.to_string(),
            image: Some(VEGETA_IMAGE.to_string()),
            command: Some(vec!["sh".to_string(), "-c".to_string()]),
            args: Some(vec![attack]),
            resources: Some(ResourceRequirements {
                limits: Some(BTreeMap::from([(
                    "memory".to_string(),
                    Quantity("100Mi".to_string()),
                )])),
                requests: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity("10m".to_string())),
                    ("memory".to_string(), Quantity("100Mi".to_string())),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        }],
    )
}

pub fn cluster_ip_service(
    name: &str,
    labels: BTreeMap<String, String>,
    port: i32,
    target_port: i32,
) -> Service {
    Service {
        metadata: metav1::ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(target_port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn ingress(
    name: &str,
    host: &str,
    path: &str,
    path_type: &str,
    labels: BTreeMap<String, String>,
    annotations: Option<BTreeMap<String, String>>,
    port: i32,
) -> Ingress {
    Ingress {
        metadata: metav1::ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            annotations,
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(path.to_string()),
                        path_type: path_type.to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: name.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(port),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn routegroup_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("zalando.org", "v1", "RouteGroup"))
}

/// A RouteGroup routing every path of `host` to the service `name`.
pub fn routegroup(
    name: &str,
    host: &str,
    labels: BTreeMap<String, String>,
    annotations: Option<BTreeMap<String, String>>,
    port: i32,
) -> DynamicObject {
    let spec = serde_json::json!({
        "hosts": [host],
        "backends": [{
            "name": name,
            "type": "service",
            "serviceName": name,
            "servicePort": port,
        }],
        "defaultBackends": [{"backendName": name}],
        "routes": [{"pathSubtree": "/"}],
    });
    let mut rg =
        DynamicObject::new(name, &routegroup_resource()).data(serde_json::json!({ "spec": spec }));
    rg.metadata.labels = Some(labels);
    rg.metadata.annotations = annotations;
    rg
}

fn average_value(target: i64) -> MetricTarget {
    MetricTarget {
        type_: "AverageValue".to_string(),
        average_value: Some(Quantity(target.to_string())),
        ..Default::default()
    }
}

fn hpa(
    deployment_name: &str,
    annotations: Option<BTreeMap<String, String>>,
    metrics: Vec<MetricSpec>,
) -> HorizontalPodAutoscaler {
    HorizontalPodAutoscaler {
        metadata: metav1::ObjectMeta {
            name: Some(HPA_NAME.to_string()),
            labels: Some(app_labels(deployment_name)),
            annotations,
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            metrics: Some(metrics),
            max_replicas: 3,
            min_replicas: Some(1),
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: deployment_name.to_string(),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn simple_pod_metric_hpa(
    deployment_name: &str,
    metric_name: &str,
    metric_target: i64,
) -> HorizontalPodAutoscaler {
    pod_metric_hpa(deployment_name, &BTreeMap::from([(metric_name.to_string(), metric_target)]))
}

/// An HPA on pod metrics collected by kube-metrics-adapter from the pods' json endpoint.
///
/// The json-path annotations are written for the last metric (in key order) only.
pub fn pod_metric_hpa(
    deployment_name: &str,
    metric_targets: &BTreeMap<String, i64>,
) -> HorizontalPodAutoscaler {
    let metrics = metric_targets
        .iter()
        .map(|(metric, target)| MetricSpec {
            type_: "Pods".to_string(),
            pods: Some(PodsMetricSource {
                metric: MetricIdentifier {
                    name: metric.clone(),
                    selector: None,
                },
                target: average_value(*target),
            }),
            ..Default::default()
        })
        .collect();
    let metric_name = metric_targets.keys().next_back().cloned().unwrap_or_default();
    let annotation = |key: &str| format!("metric-config.pods.{metric_name}.json-path/{key}");
    let annotations = BTreeMap::from([
        (annotation("json-key"), "$.queue.length".to_string()),
        (annotation("path"), "/metrics".to_string()),
        (annotation("port"), SAMPLE_APP_PORT.to_string()),
    ]);
    hpa(deployment_name, Some(annotations), metrics)
}

/// An HPA on the requests per second that Skipper measures for `name` (an Ingress or RouteGroup).
pub fn rps_based_hpa(
    deployment_name: &str,
    name: &str,
    api_version: &str,
    kind: &str,
    metric_target: i64,
) -> HorizontalPodAutoscaler {
    object_hpa(
        deployment_name,
        name,
        api_version,
        kind,
        &BTreeMap::from([("requests-per-second".to_string(), metric_target)]),
    )
}

pub fn object_hpa(
    deployment_name: &str,
    name: &str,
    api_version: &str,
    kind: &str,
    metric_targets: &BTreeMap<String, i64>,
) -> HorizontalPodAutoscaler {
    let metrics = metric_targets
        .iter()
        .map(|(metric, target)| MetricSpec {
            type_: "Object".to_string(),
            object: Some(ObjectMetricSource {
                described_object: CrossVersionObjectReference {
                    api_version: Some(api_version.to_string()),
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                metric: MetricIdentifier {
                    name: metric.clone(),
                    selector: None,
                },
                target: average_value(*target),
            }),
            ..Default::default()
        })
        .collect();
    hpa(deployment_name, None, metrics)
}

/// An HPA on the external requests-per-second metric of `host`.
pub fn external_rps_hpa(
    deployment_name: &str,
    host: &str,
    weight: &str,
    target: i64,
) -> HorizontalPodAutoscaler {
    external_hpa(
        deployment_name,
        &BTreeMap::from([("foo".to_string(), target)]),
        string_map([
            ("metric-config.external.foo.requests-per-second/hostnames", host),
            ("metric-config.external.foo.requests-per-second/weight", weight),
        ]),
    )
}

pub fn external_hpa(
    deployment_name: &str,
    metric_targets: &BTreeMap<String, i64>,
    annotations: BTreeMap<String, String>,
) -> HorizontalPodAutoscaler {
    let metrics = metric_targets
        .iter()
        .map(|(metric, target)| MetricSpec {
            type_: "External".to_string(),
            external: Some(ExternalMetricSource {
                metric: MetricIdentifier {
                    name: metric.clone(),
                    selector: Some(metav1::LabelSelector {
                        match_labels: Some(string_map([("type", "requests-per-second")])),
                        ..Default::default()
                    }),
                },
                target: average_value(*target),
            }),
            ..Default::default()
        })
        .collect();
    hpa(deployment_name, Some(annotations), metrics)
}
