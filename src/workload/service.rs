//! The Service exposing a SpinApp

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use super::{
    app_labels, owner_reference, status_label, DEFAULT_HTTP_PORT, HTTP_PORT_NAME, STATUS_READY,
};
use crate::crd::SpinApp;
use crate::Error;

/// Build the ClusterIP Service routing to the app's ready pods
pub fn construct_service(app: &SpinApp) -> Result<Service, Error> {
    let name = app.name_any();
    let annotations = &app.spec.service_annotations;

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: app.namespace(),
            labels: Some(app_labels(&name)),
            annotations: (!annotations.is_empty()).then(|| annotations.clone()),
            owner_references: Some(vec![owner_reference(app)?]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                name: Some(HTTP_PORT_NAME.to_string()),
                protocol: Some("TCP".to_string()),
                port: DEFAULT_HTTP_PORT,
                target_port: Some(IntOrString::String(HTTP_PORT_NAME.to_string())),
                ..Default::default()
            }]),
            selector: Some([(status_label(&name), STATUS_READY.to_string())].into()),
            ..Default::default()
        }),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{fixtures, NAME_LABEL};

    #[test]
    fn story_service_targets_ready_pods() {
        let mut app = fixtures::app("hello");
        app.spec
            .service_annotations
            .insert("lb".to_string(), "internal".to_string());

        let service = construct_service(&app).unwrap();
        assert_eq!(service.metadata.name.as_deref(), Some("hello"));
        assert_eq!(service.metadata.labels.as_ref().unwrap()[NAME_LABEL], "hello");
        assert_eq!(service.metadata.annotations.as_ref().unwrap()["lb"], "internal");

        let spec = service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        let selector = spec.selector.unwrap();
        assert_eq!(selector.len(), 1);
        assert_eq!(selector["core.spinoperator.dev/app.hello.status"], "ready");

        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 80);
        assert_eq!(port.name.as_deref(), Some("http-app"));
        assert_eq!(port.protocol.as_deref(), Some("TCP"));
        assert_eq!(
            port.target_port,
            Some(IntOrString::String("http-app".to_string()))
        );
    }

    #[test]
    fn no_annotations_leaves_field_unset() {
        let service = construct_service(&fixtures::app("hello")).unwrap();
        assert!(service.metadata.annotations.is_none());
    }
}
