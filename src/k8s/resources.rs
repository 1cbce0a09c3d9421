//! Kubernetes resource builders for the e2e run
//!
//! Pure functions producing the Namespace, Deployment, Service, Ingress and
//! probe Pod specs. Same inputs always give the same objects.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Namespace, Pod, PodSpec, PodTemplateSpec, ResourceRequirements,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// Label key shared by every object of the run
pub const E2E_LABEL: &str = "e2e";
/// Label value put on the namespaces
pub const NAMESPACE_LABEL_VALUE: &str = "true";

pub const WORKLOAD_NAME: &str = "demo-k8s";
pub const WORKLOAD_LABEL: &str = "demo-k8s";
pub const WORKLOAD_IMAGE: &str = "paulbouwer/hello-kubernetes:1.10";
pub const SERVICE_NAME: &str = "demo-k8s";
pub const INGRESS_NAME: &str = "demo-k8s-ingress";
pub const INGRESS_PATH: &str = "/demo-k8s";

pub const PROBE_POD_NAME: &str = "flowtester";
pub const PROBE_LABEL: &str = "flow-tester";
pub const PROBE_IMAGE: &str = "nicolaka/netshoot:v0.9";

pub const WORKLOAD_PORT: i32 = 8080;

/// Printed by the probe when the TCP connect succeeded
pub const FLOW_OPEN: &str = "Flow is open";
/// Printed by the probe when the TCP connect failed or timed out
pub const FLOW_CLOSED: &str = "Flow is not open";

/// `e2e=<value>` label map
pub fn e2e_labels(value: &str) -> BTreeMap<String, String> {
    [(E2E_LABEL.to_string(), value.to_string())]
        .into_iter()
        .collect()
}

/// `e2e=<value>` selector string for list calls
pub fn label_selector(value: &str) -> String {
    format!("{}={}", E2E_LABEL, value)
}

/// `<registry>/<image>`
pub fn image_ref(registry: &str, image: &str) -> String {
    format!("{}/{}", registry.trim_end_matches('/'), image)
}

pub fn create_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(e2e_labels(NAMESPACE_LABEL_VALUE)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Whether a namespace carries the label this harness puts on its own
pub fn is_e2e_namespace(namespace: &Namespace) -> bool {
    namespace
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(E2E_LABEL))
        .map(|v| v == NAMESPACE_LABEL_VALUE)
        .unwrap_or(false)
}

/// Requests and limits shared by the workload and the probe
fn build_resource_requirements() -> ResourceRequirements {
    let limits: BTreeMap<String, Quantity> = [
        ("cpu".to_string(), Quantity("100m".to_string())),
        ("memory".to_string(), Quantity("128Mi".to_string())),
    ]
    .into_iter()
    .collect();
    let requests: BTreeMap<String, Quantity> = [
        ("cpu".to_string(), Quantity("60m".to_string())),
        ("memory".to_string(), Quantity("64Mi".to_string())),
    ]
    .into_iter()
    .collect();

    ResourceRequirements {
        limits: Some(limits),
        requests: Some(requests),
        ..Default::default()
    }
}

/// Single-replica demo workload listening on 8080
pub fn create_workload_deployment(namespace: &str, registry: &str) -> Deployment {
    let labels = e2e_labels(WORKLOAD_LABEL);

    Deployment {
        metadata: ObjectMeta {
            name: Some(WORKLOAD_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: WORKLOAD_NAME.to_string(),
                        image: Some(image_ref(registry, WORKLOAD_IMAGE)),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        ports: Some(vec![ContainerPort {
                            container_port: WORKLOAD_PORT,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        resources: Some(build_resource_requirements()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service fronting the workload pods; its selector is the workload's pod labels
pub fn create_workload_service(namespace: &str) -> Service {
    let labels = e2e_labels(WORKLOAD_LABEL);

    Service {
        metadata: ObjectMeta {
            name: Some(SERVICE_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: WORKLOAD_PORT,
                target_port: Some(IntOrString::Int(WORKLOAD_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ingress routing `<host>/demo-k8s` (exact match) to the workload service
///
/// Without a host the rule matches requests for any host.
pub fn create_workload_ingress(namespace: &str, host: Option<&str>) -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            name: Some(INGRESS_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(e2e_labels(WORKLOAD_LABEL)),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: host.map(str::to_string),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(INGRESS_PATH.to_string()),
                        path_type: "Exact".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: SERVICE_NAME.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(WORKLOAD_PORT),
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

/// Shell loop run by the probe pod
///
/// Once per second it tries a 1s TCP connect to `ip:port` and prints one of
/// the flow sentinels. TERM makes it exit 0.
pub fn probe_command(ip: &str, port: i32) -> String {
    format!(
        "trap 'exit 0' TERM; while true; do if timeout 1 nc -z {} {}; then echo '{}'; else echo '{}'; fi; sleep 1; done",
        ip, port, FLOW_OPEN, FLOW_CLOSED
    )
}

/// Standalone probe pod checking TCP reachability of `target_ip:8080`
pub fn create_probe_pod(namespace: &str, registry: &str, target_ip: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(PROBE_POD_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(e2e_labels(PROBE_LABEL)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: PROBE_POD_NAME.to_string(),
                image: Some(image_ref(registry, PROBE_IMAGE)),
                command: Some(vec!["/bin/sh".to_string()]),
                args: Some(vec![
                    "-c".to_string(),
                    probe_command(target_ip, WORKLOAD_PORT),
                ]),
                resources: Some(build_resource_requirements()),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_e2e_labels() {
        let labels = e2e_labels("demo-k8s");
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.get("e2e"), Some(&"demo-k8s".to_string()));
        assert_eq!(label_selector("flow-tester"), "e2e=flow-tester");
    }

    #[test]
    fn test_image_ref_ignores_trailing_slash() {
        assert_eq!(
            image_ref("reg.example.com/", WORKLOAD_IMAGE),
            "reg.example.com/paulbouwer/hello-kubernetes:1.10"
        );
    }

    #[test]
    fn test_create_namespace() {
        let ns = create_namespace("eph-demo-app");
        assert_eq!(ns.metadata.name, Some("eph-demo-app".to_string()));
        assert_eq!(ns.metadata.labels, Some(e2e_labels("true")));
    }

    #[test]
    fn test_create_workload_deployment() {
        let deployment = create_workload_deployment("eph-demo-app", "reg.example.com");

        assert_eq!(deployment.metadata.name, Some("demo-k8s".to_string()));
        assert_eq!(deployment.metadata.namespace, Some("eph-demo-app".to_string()));

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.selector.match_labels, Some(e2e_labels(WORKLOAD_LABEL)));

        let template_labels = spec.template.metadata.unwrap().labels;
        assert_eq!(template_labels, Some(e2e_labels(WORKLOAD_LABEL)));

        let container = &spec.template.spec.unwrap().containers[0];
        assert_eq!(
            container.image,
            Some("reg.example.com/paulbouwer/hello-kubernetes:1.10".to_string())
        );
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8080);

        let resources = container.resources.as_ref().unwrap();
        let limits = resources.limits.as_ref().unwrap();
        let requests = resources.requests.as_ref().unwrap();
        assert_eq!(limits["cpu"], Quantity("100m".to_string()));
        assert_eq!(limits["memory"], Quantity("128Mi".to_string()));
        assert_eq!(requests["cpu"], Quantity("60m".to_string()));
        assert_eq!(requests["memory"], Quantity("64Mi".to_string()));
    }

    #[test]
    fn test_service_selector_matches_workload_pods() {
        let deployment = create_workload_deployment("eph-demo-app", "reg.example.com");
        let service = create_workload_service("eph-demo-app");

        let pod_labels = deployment.spec.unwrap().template.metadata.unwrap().labels;
        let spec = service.spec.unwrap();
        assert_eq!(spec.selector, pod_labels);

        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 8080);
        assert_eq!(port.target_port, Some(IntOrString::Int(8080)));
    }

    #[test]
    fn test_create_workload_ingress() {
        let ingress = create_workload_ingress("eph-demo-app", Some("demo.example.com"));
        assert_eq!(ingress.metadata.name, Some("demo-k8s-ingress".to_string()));

        let rule = &ingress.spec.unwrap().rules.unwrap()[0];
        assert_eq!(rule.host, Some("demo.example.com".to_string()));

        let path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(path.path, Some("/demo-k8s".to_string()));
        assert_eq!(path.path_type, "Exact");

        let backend = path.backend.service.as_ref().unwrap();
        assert_eq!(backend.name, "demo-k8s");
        assert_eq!(backend.port.as_ref().unwrap().number, Some(8080));
    }

    #[test]
    fn test_ingress_without_host_matches_any_host() {
        let ingress = create_workload_ingress("eph-demo-app", None);
        let rule = &ingress.spec.unwrap().rules.unwrap()[0];
        assert_eq!(rule.host, None);
        assert_eq!(
            rule.http.as_ref().unwrap().paths[0].path,
            Some("/demo-k8s".to_string())
        );
    }

    #[test]
    fn test_is_e2e_namespace() {
        assert!(is_e2e_namespace(&create_namespace("eph-demo-app")));
        assert!(!is_e2e_namespace(&Namespace::default()));

        let mut foreign = create_namespace("team-prod");
        foreign.metadata.labels = Some(e2e_labels("demo-k8s"));
        assert!(!is_e2e_namespace(&foreign));
    }

    #[test]
    fn test_probe_command() {
        let cmd = probe_command("10.42.0.7", 8080);
        assert!(cmd.starts_with("trap 'exit 0' TERM;"));
        assert!(cmd.contains("timeout 1 nc -z 10.42.0.7 8080"));
        assert!(cmd.contains("echo 'Flow is open'"));
        assert!(cmd.contains("echo 'Flow is not open'"));
        assert!(cmd.contains("sleep 1"));
    }

    #[test]
    fn test_create_probe_pod() {
        let pod = create_probe_pod("eph-demo-net", "reg.example.com", "10.42.0.7");
        assert_eq!(pod.metadata.name, Some("flowtester".to_string()));
        assert_eq!(pod.metadata.labels, Some(e2e_labels("flow-tester")));

        let container = &pod.spec.unwrap().containers[0];
        assert_eq!(
            container.image,
            Some("reg.example.com/nicolaka/netshoot:v0.9".to_string())
        );
        assert_eq!(container.command, Some(vec!["/bin/sh".to_string()]));
        let args = container.args.as_ref().unwrap();
        assert_eq!(args[0], "-c");
        assert_eq!(args[1], probe_command("10.42.0.7", 8080));
    }

    #[test]
    fn test_sentinels_do_not_overlap() {
        assert!(!FLOW_CLOSED.contains(FLOW_OPEN));
    }
}
