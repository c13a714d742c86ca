//! The Deployment running a SpinApp

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use super::{
    app_labels, construct_env, construct_probes, construct_volumes, owner_reference, ready_labels,
    volumes::RUNTIME_CONFIG_MOUNT_PATH, DEFAULT_HTTP_PORT, HTTP_PORT_NAME,
};
use crate::crd::{ExecutorDeploymentConfig, SpinApp};
use crate::Error;

/// How the app's Wasm is executed inside the pod
#[derive(Clone, Debug, PartialEq, Eq)]
enum ExecutionProfile<'a> {
    /// The containerd shim runs the app image directly
    RuntimeClass(&'a str),
    /// A regular container runs `spin up -f <app image>`
    SpinImage(&'a str),
}

impl<'a> ExecutionProfile<'a> {
    fn from_config(config: &'a ExecutorDeploymentConfig) -> Result<Self, Error> {
        match (config.runtime_class(), config.spin_image()) {
            (Some(_), Some(_)) => Err(Error::construct(
                "deployment",
                "runtimeClassName and spinImage are mutually exclusive",
            )),
            (Some(class), None) => Ok(Self::RuntimeClass(class)),
            (None, Some(image)) => Ok(Self::SpinImage(image)),
            (None, None) => Err(Error::construct(
                "deployment",
                "either runtimeClassName or spinImage must be set",
            )),
        }
    }
}

/// Build the Deployment for an app.
///
/// `generated_secret` names the secret holding the rendered runtime config,
/// `ca_secret` the secret holding the CA bundle.
pub fn construct_deployment(
    app: &SpinApp,
    config: &ExecutorDeploymentConfig,
    generated_secret: Option<&str>,
    ca_secret: Option<&str>,
) -> Result<Deployment, Error> {
    let name = app.name_any();
    let spec = &app.spec;
    let profile = ExecutionProfile::from_config(config)?;

    let (volumes, volume_mounts) = construct_volumes(app, generated_secret, ca_secret)?;
    let (readiness_probe, liveness_probe) = construct_probes(&spec.checks)?;
    let env = construct_env(app, config.otel.as_ref());
    let mounts_runtime_config = volume_mounts
        .iter()
        .any(|m| m.mount_path == RUNTIME_CONFIG_MOUNT_PATH);

    let mut container = Container {
        name: name.clone(),
        ports: Some(vec![ContainerPort {
            name: Some(HTTP_PORT_NAME.to_string()),
            container_port: DEFAULT_HTTP_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(env),
        volume_mounts: Some(volume_mounts),
        resources: Some(ResourceRequirements {
            limits: spec.resources.limits.clone(),
            requests: spec.resources.requests.clone(),
            ..Default::default()
        }),
        readiness_probe,
        liveness_probe,
        image_pull_policy: spec.image_pull_policy.clone(),
        ..Default::default()
    };

    let mut runtime_class_name = None;
    match profile {
        ExecutionProfile::RuntimeClass(class) => {
            container.image = Some(spec.image.clone());
            container.command = Some(vec!["/".to_string()]);
            runtime_class_name = Some(class.to_string());
        }
        ExecutionProfile::SpinImage(image) => {
            let mut args = vec![
                "up".to_string(),
                "--listen".to_string(),
                super::env::LISTEN_ADDR.to_string(),
                "-f".to_string(),
                spec.image.clone(),
            ];
            if mounts_runtime_config {
                args.push("--runtime-config-file".to_string());
                args.push(RUNTIME_CONFIG_MOUNT_PATH.to_string());
            }
            container.image = Some(image.to_string());
            container.args = Some(args);
        }
    }

    // operator labels are applied last so they win over podLabels
    let selector = ready_labels(&name);
    let mut template_labels = spec.pod_labels.clone();
    template_labels.extend(selector.clone());

    let image_pull_secrets = (!spec.image_pull_secrets.is_empty())
        .then(|| spec.image_pull_secrets.clone());
    let annotations = |map: &std::collections::BTreeMap<String, String>| {
        (!map.is_empty()).then(|| map.clone())
    };

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: app.namespace(),
            labels: Some(app_labels(&name)),
            annotations: annotations(&spec.deployment_annotations),
            owner_references: Some(vec![owner_reference(app)?]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: spec.desired_replicas(),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(template_labels),
                    annotations: annotations(&spec.pod_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    runtime_class_name,
                    containers: vec![container],
                    image_pull_secrets,
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{HealthProbe, OtelConfig};
    use crate::workload::{fixtures, NAME_LABEL};
    use k8s_openapi::api::core::v1::LocalObjectReference;

    fn container(deployment: &Deployment) -> &Container {
        &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
    }

    fn pod_spec(deployment: &Deployment) -> &PodSpec {
        deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    #[test]
    fn story_shim_deployment_shape() {
        let mut app = fixtures::app("hello");
        app.spec.replicas = Some(3);
        app.spec.image_pull_secrets = vec![LocalObjectReference {
            name: "registry".to_string(),
        }];
        app.spec
            .deployment_annotations
            .insert("team".to_string(), "wasm".to_string());

        let deployment = construct_deployment(&app, &fixtures::shim_config(), None, None).unwrap();

        assert_eq!(deployment.metadata.name.as_deref(), Some("hello"));
        assert_eq!(deployment.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(deployment.metadata.labels.as_ref().unwrap()[NAME_LABEL], "hello");
        assert_eq!(
            deployment.metadata.annotations.as_ref().unwrap()["team"],
            "wasm"
        );
        let owner = &deployment.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.uid, "hello-uid");

        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(
            spec.selector.match_labels.as_ref().unwrap()["core.spinoperator.dev/app.hello.status"],
            "ready"
        );

        let pod = pod_spec(&deployment);
        assert_eq!(pod.runtime_class_name.as_deref(), Some("wasmtime-spin-v2"));
        assert_eq!(pod.image_pull_secrets.as_ref().unwrap()[0].name, "registry");

        let c = container(&deployment);
        assert_eq!(c.name, "hello");
        assert_eq!(c.image.as_deref(), Some("ghcr.io/example/app:v1"));
        assert_eq!(c.command.as_ref().unwrap(), &vec!["/".to_string()]);
        let port = &c.ports.as_ref().unwrap()[0];
        assert_eq!(port.name.as_deref(), Some("http-app"));
        assert_eq!(port.container_port, 80);
    }

    #[test]
    fn autoscaling_omits_replicas() {
        let mut app = fixtures::app("hello");
        app.spec.enable_autoscaling = true;
        let deployment = construct_deployment(&app, &fixtures::shim_config(), None, None).unwrap();
        assert_eq!(deployment.spec.unwrap().replicas, None);
    }

    #[test]
    fn operator_labels_win_over_pod_labels() {
        let mut app = fixtures::app("hello");
        app.spec
            .pod_labels
            .insert(NAME_LABEL.to_string(), "spoofed".to_string());
        app.spec
            .pod_labels
            .insert("tier".to_string(), "edge".to_string());

        let deployment = construct_deployment(&app, &fixtures::shim_config(), None, None).unwrap();
        let labels = deployment
            .spec
            .unwrap()
            .template
            .metadata
            .unwrap()
            .labels
            .unwrap();
        assert_eq!(labels[NAME_LABEL], "hello");
        assert_eq!(labels["tier"], "edge");
    }

    /// Story: a generated runtime config is mounted and passed to spin up
    #[test]
    fn story_spintainer_uses_runtime_config_flag() {
        let app = fixtures::app("hello");
        let deployment = construct_deployment(
            &app,
            &fixtures::spintainer_config(),
            Some("hello-1a2b3c4d"),
            None,
        )
        .unwrap();

        let c = container(&deployment);
        assert_eq!(c.image.as_deref(), Some("ghcr.io/fermyon/spin:v2.7.0"));
        assert!(c.command.is_none());
        assert_eq!(
            c.args.as_ref().unwrap(),
            &vec![
                "up",
                "--listen",
                "0.0.0.0:80",
                "-f",
                "ghcr.io/example/app:v1",
                "--runtime-config-file",
                "/runtime-config.toml",
            ]
        );
        assert!(pod_spec(&deployment).runtime_class_name.is_none());
        let mounts = c.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/runtime-config.toml");
    }

    #[test]
    fn spintainer_without_runtime_config_has_no_flag() {
        let app = fixtures::app("hello");
        let deployment =
            construct_deployment(&app, &fixtures::spintainer_config(), None, None).unwrap();
        assert_eq!(container(&deployment).args.as_ref().unwrap().len(), 5);
    }

    #[test]
    fn otel_endpoints_reach_container_env() {
        let app = fixtures::app("hello");
        let mut config = fixtures::shim_config();
        config.otel = Some(OtelConfig {
            exporter_otlp_endpoint: "http://otel:4318".to_string(),
            ..Default::default()
        });
        let deployment = construct_deployment(&app, &config, None, None).unwrap();
        let env = container(&deployment).env.as_ref().unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == "OTEL_EXPORTER_OTLP_ENDPOINT"
                && e.value.as_deref() == Some("http://otel:4318")));
    }

    #[test]
    fn execution_profile_must_be_unambiguous() {
        let app = fixtures::app("hello");
        let mut both = fixtures::shim_config();
        both.spin_image = Some("spin".to_string());
        assert!(construct_deployment(&app, &both, None, None)
            .unwrap_err()
            .to_string()
            .contains("mutually exclusive"));

        let neither = ExecutorDeploymentConfig::default();
        assert!(construct_deployment(&app, &neither, None, None)
            .unwrap_err()
            .to_string()
            .contains("either runtimeClassName or spinImage must be set"));
    }

    #[test]
    fn invalid_probe_fails_construction() {
        let mut app = fixtures::app("hello");
        app.spec.checks.readiness = Some(HealthProbe::default());
        let err = construct_deployment(&app, &fixtures::shim_config(), None, None).unwrap_err();
        assert!(err
            .to_string()
            .contains("unknown configuration, expected httpGet"));
    }
}
