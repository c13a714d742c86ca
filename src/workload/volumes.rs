//! Pod volumes and container mounts

use k8s_openapi::api::core::v1::{KeyToPath, SecretVolumeSource, Volume, VolumeMount};

use crate::crd::SpinApp;
use crate::runtime_config::RUNTIME_CONFIG_KEY;
use crate::Error;

/// Volume holding the runtime config
pub const RUNTIME_CONFIG_VOLUME: &str = "spin-runtime-config";

/// Where Spin reads the runtime config from
pub const RUNTIME_CONFIG_MOUNT_PATH: &str = "/runtime-config.toml";

/// Volume holding the CA bundle
pub const CA_VOLUME: &str = "spin-ca";

/// Key of the bundle inside the CA secret
pub const CA_BUNDLE_KEY: &str = "ca-certificates.crt";

/// Where the CA bundle is mounted
pub const CA_MOUNT_PATH: &str = "/etc/ssl/certs/ca-certificates.crt";

/// Build the pod volumes and app container mounts.
///
/// Order is the runtime-config volume (from the user's `loadFromSecret` or
/// the generated secret), then user volumes, then the CA volume. The user
/// secret and a generated secret are mutually exclusive.
pub fn construct_volumes(
    app: &SpinApp,
    generated_secret: Option<&str>,
    ca_secret: Option<&str>,
) -> Result<(Vec<Volume>, Vec<VolumeMount>), Error> {
    let user_secret = app.spec.runtime_config.verbatim_secret();
    let runtime_secret = match (user_secret, generated_secret) {
        (Some(_), Some(_)) => {
            return Err(Error::construct(
                "volumes",
                "cannot specify both a user-provided runtime secret and a generated one",
            ))
        }
        (user, generated) => user.or(generated),
    };

    let mut volumes = Vec::new();
    let mut mounts = Vec::new();

    if let Some(secret) = runtime_secret {
        volumes.push(secret_volume(RUNTIME_CONFIG_VOLUME, secret, RUNTIME_CONFIG_KEY));
        mounts.push(file_mount(
            RUNTIME_CONFIG_VOLUME,
            RUNTIME_CONFIG_MOUNT_PATH,
            RUNTIME_CONFIG_KEY,
        ));
    }

    volumes.extend(app.spec.volumes.iter().cloned());
    mounts.extend(app.spec.volume_mounts.iter().cloned());

    if let Some(secret) = ca_secret {
        volumes.push(secret_volume(CA_VOLUME, secret, CA_BUNDLE_KEY));
        mounts.push(file_mount(CA_VOLUME, CA_MOUNT_PATH, CA_BUNDLE_KEY));
    }

    Ok((volumes, mounts))
}

fn secret_volume(volume: &str, secret: &str, key: &str) -> Volume {
    Volume {
        name: volume.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            optional: Some(true),
            items: Some(vec![KeyToPath {
                key: key.to_string(),
                path: key.to_string(),
                mode: None,
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn file_mount(volume: &str, path: &str, sub_path: &str) -> VolumeMount {
    VolumeMount {
        name: volume.to_string(),
        mount_path: path.to_string(),
        sub_path: Some(sub_path.to_string()),
        read_only: Some(true),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::fixtures;
    use k8s_openapi::api::core::v1::EmptyDirVolumeSource;

    fn with_user_volume(mut app: SpinApp) -> SpinApp {
        app.spec.volumes.push(Volume {
            name: "scratch".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
        app.spec.volume_mounts.push(VolumeMount {
            name: "scratch".to_string(),
            mount_path: "/scratch".to_string(),
            ..Default::default()
        });
        app
    }

    #[test]
    fn no_config_and_no_ca_yields_only_user_volumes() {
        let app = with_user_volume(fixtures::app("hello"));
        let (volumes, mounts) = construct_volumes(&app, None, None).unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(mounts.len(), 1);
        assert_eq!(volumes[0].name, "scratch");
    }

    #[test]
    fn user_and_generated_secret_are_exclusive() {
        let mut app = fixtures::app("hello");
        app.spec.runtime_config.load_from_secret = Some("mine".to_string());
        let err = construct_volumes(&app, Some("hello-0000abcd"), None).unwrap_err();
        assert!(err
            .to_string()
            .contains("cannot specify both a user-provided runtime secret and a generated one"));
    }

    /// Story: a generated config secret is mounted first, CA last
    #[test]
    fn story_generated_secret_and_ca_ordering() {
        let app = with_user_volume(fixtures::app("hello"));
        let (volumes, mounts) =
            construct_volumes(&app, Some("hello-0a1b2c3d"), Some("spin-ca")).unwrap();

        let names: Vec<_> = volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["spin-runtime-config", "scratch", "spin-ca"]);

        let config = volumes[0].secret.as_ref().unwrap();
        assert_eq!(config.secret_name.as_deref(), Some("hello-0a1b2c3d"));
        assert_eq!(config.optional, Some(true));
        assert_eq!(config.items.as_ref().unwrap()[0].key, "runtime-config.toml");

        assert_eq!(mounts[0].mount_path, "/runtime-config.toml");
        assert_eq!(mounts[0].sub_path.as_deref(), Some("runtime-config.toml"));
        assert_eq!(mounts[0].read_only, Some(true));
        assert_eq!(mounts[2].mount_path, "/etc/ssl/certs/ca-certificates.crt");
        assert_eq!(mounts[2].sub_path.as_deref(), Some("ca-certificates.crt"));
    }

    #[test]
    fn user_secret_is_mounted_as_runtime_config() {
        let mut app = fixtures::app("hello");
        app.spec.runtime_config.load_from_secret = Some("prebuilt".to_string());
        let (volumes, mounts) = construct_volumes(&app, None, None).unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(
            volumes[0].secret.as_ref().unwrap().secret_name.as_deref(),
            Some("prebuilt")
        );
        assert_eq!(mounts[0].name, RUNTIME_CONFIG_VOLUME);
    }
}
