//! External references of a runtime config
//!
//! Options can pull values from Secrets and ConfigMaps. Several options often
//! point at different keys of the same object, so references are collected
//! per object and every object is fetched once.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{RuntimeConfigOption, SpinApp};
use crate::Error;

/// Upper bound on concurrent fetches within one build
pub const MAX_CONCURRENT_FETCHES: usize = 10;

/// Namespace and name of a referenced object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl ObjectKey {
    /// Create a key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Read-only lookup of the objects runtime config options can reference.
///
/// `Ok(None)` means the object does not exist.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    /// Get a Secret by namespace and name
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Get a ConfigMap by namespace and name
    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<Option<ConfigMap>, Error>;
}

/// Deduplicated set of objects a runtime config depends on
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExternalReferences {
    /// Referenced Secrets
    pub secrets: BTreeSet<ObjectKey>,
    /// Referenced ConfigMaps
    pub config_maps: BTreeSet<ObjectKey>,
}

/// Objects fetched for an [`ExternalReferences`] set
#[derive(Clone, Debug, Default)]
pub struct ResolvedDependencies {
    /// Fetched Secrets by key
    pub secrets: BTreeMap<ObjectKey, Secret>,
    /// Fetched ConfigMaps by key
    pub config_maps: BTreeMap<ObjectKey, ConfigMap>,
}

/// Collect every Secret and ConfigMap referenced by the app's runtime config.
///
/// Returns an empty set when the config is loaded verbatim from a secret.
/// References always resolve in the app's own namespace.
pub fn extract_references(app: &SpinApp) -> ExternalReferences {
    let mut refs = ExternalReferences::default();
    let runtime_config = &app.spec.runtime_config;
    if runtime_config.verbatim_secret().is_some() {
        return refs;
    }

    let namespace = app.namespace().unwrap_or_default();
    let options = runtime_config
        .llm_compute
        .iter()
        .flat_map(|llm| llm.options.iter())
        .chain(
            runtime_config
                .key_value_stores
                .iter()
                .flat_map(|kv| kv.options.iter()),
        )
        .chain(
            runtime_config
                .sqlite_databases
                .iter()
                .flat_map(|db| db.options.iter()),
        );

    for option in options {
        collect_option(&mut refs, &namespace, option);
    }
    refs
}

fn collect_option(refs: &mut ExternalReferences, namespace: &str, option: &RuntimeConfigOption) {
    let Some(source) = &option.value_from else {
        return;
    };
    if let Some(secret) = &source.secret_key_ref {
        refs.secrets.insert(ObjectKey::new(namespace, &secret.name));
    }
    if let Some(cm) = &source.config_map_key_ref {
        refs.config_maps.insert(ObjectKey::new(namespace, &cm.name));
    }
}

enum Reference {
    Secret(ObjectKey),
    ConfigMap(ObjectKey),
}

enum Fetched {
    Secret(ObjectKey, Secret),
    ConfigMap(ObjectKey, ConfigMap),
}

async fn fetch_one(
    lookup: Arc<dyn ReferenceLookup>,
    reference: Reference,
) -> Result<Fetched, Error> {
    match reference {
        Reference::Secret(key) => {
            debug!(secret = %key, "fetching secret");
            match lookup.get_secret(&key.namespace, &key.name).await? {
                Some(secret) => Ok(Fetched::Secret(key, secret)),
                None => Err(Error::missing("secret", &key.namespace, &key.name)),
            }
        }
        Reference::ConfigMap(key) => {
            debug!(config_map = %key, "fetching config map");
            match lookup.get_config_map(&key.namespace, &key.name).await? {
                Some(cm) => Ok(Fetched::ConfigMap(key, cm)),
                None => Err(Error::missing("configmap", &key.namespace, &key.name)),
            }
        }
    }
}

impl ExternalReferences {
    /// True when nothing needs fetching
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty() && self.config_maps.is_empty()
    }

    /// Fetch every referenced object.
    ///
    /// At most [`MAX_CONCURRENT_FETCHES`] requests are in flight. The first
    /// failure (including a missing object) is returned and the remaining
    /// in-flight fetches are dropped.
    pub async fn fetch(
        &self,
        lookup: Arc<dyn ReferenceLookup>,
    ) -> Result<ResolvedDependencies, Error> {
        let references: Vec<Reference> = self
            .secrets
            .iter()
            .cloned()
            .map(Reference::Secret)
            .chain(self.config_maps.iter().cloned().map(Reference::ConfigMap))
            .collect();

        let fetched: Vec<Fetched> = stream::iter(references)
            .map(move |reference| fetch_one(lookup.clone(), reference))
            .buffer_unordered(MAX_CONCURRENT_FETCHES)
            .try_collect()
            .await?;

        let mut resolved = ResolvedDependencies::default();
        for item in fetched {
            match item {
                Fetched::Secret(key, secret) => {
                    resolved.secrets.insert(key, secret);
                }
                Fetched::ConfigMap(key, cm) => {
                    resolved.config_maps.insert(key, cm);
                }
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        LlmComputeBinding, RuntimeBinding, RuntimeConfig, RuntimeConfigVarSource, SpinAppSpec,
    };
    use k8s_openapi::api::core::v1::{ConfigMapKeySelector, SecretKeySelector};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn secret_option(name: &str, secret: &str, key: &str) -> RuntimeConfigOption {
        RuntimeConfigOption {
            name: name.to_string(),
            value: None,
            value_from: Some(RuntimeConfigVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret.to_string(),
                    key: key.to_string(),
                    optional: None,
                }),
                config_map_key_ref: None,
            }),
        }
    }

    fn config_map_option(name: &str, cm: &str, key: &str) -> RuntimeConfigOption {
        RuntimeConfigOption {
            name: name.to_string(),
            value: None,
            value_from: Some(RuntimeConfigVarSource {
                config_map_key_ref: Some(ConfigMapKeySelector {
                    name: cm.to_string(),
                    key: key.to_string(),
                    optional: None,
                }),
                secret_key_ref: None,
            }),
        }
    }

    fn static_option(name: &str, value: &str) -> RuntimeConfigOption {
        RuntimeConfigOption {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        }
    }

    fn app_with(runtime_config: RuntimeConfig) -> SpinApp {
        SpinApp {
            metadata: ObjectMeta {
                name: Some("my-app".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: SpinAppSpec {
                image: "ghcr.io/example/app:v1".to_string(),
                runtime_config,
                ..Default::default()
            },
            status: None,
        }
    }

    fn binding(name: &str, type_: &str, options: Vec<RuntimeConfigOption>) -> RuntimeBinding {
        RuntimeBinding {
            name: name.to_string(),
            type_: type_.to_string(),
            options,
        }
    }

    fn named_secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn static_values_have_no_references() {
        let app = app_with(RuntimeConfig {
            key_value_stores: vec![binding(
                "my-kv-store",
                "magical",
                vec![static_option("secret", "i-put-secrets-in-plain-text")],
            )],
            ..Default::default()
        });
        assert!(extract_references(&app).is_empty());
    }

    /// Story: two stores reading different keys of one secret fetch it once
    #[test]
    fn story_repeated_secret_is_deduplicated() {
        let app = app_with(RuntimeConfig {
            key_value_stores: vec![
                binding("a", "redis", vec![secret_option("url", "my-secret-a", "url-a")]),
                binding("b", "redis", vec![secret_option("url", "my-secret-a", "url-b")]),
            ],
            sqlite_databases: vec![binding(
                "db",
                "libsql",
                vec![
                    config_map_option("url", "my-cm-b", "url"),
                    secret_option("token", "my-secret-c", "token"),
                ],
            )],
            llm_compute: Some(LlmComputeBinding {
                type_: "remote_http".to_string(),
                options: vec![config_map_option("url", "my-cm-b", "llm")],
            }),
            ..Default::default()
        });

        let refs = extract_references(&app);
        let secrets: Vec<_> = refs.secrets.iter().map(|k| k.name.as_str()).collect();
        let cms: Vec<_> = refs.config_maps.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(secrets, vec!["my-secret-a", "my-secret-c"]);
        assert_eq!(cms, vec!["my-cm-b"]);
        assert!(refs.secrets.iter().all(|k| k.namespace == "default"));
    }

    #[test]
    fn load_from_secret_short_circuits() {
        let app = app_with(RuntimeConfig {
            load_from_secret: Some("prebuilt".to_string()),
            key_value_stores: vec![binding("a", "redis", vec![secret_option("url", "s", "k")])],
            ..Default::default()
        });
        assert!(extract_references(&app).is_empty());
    }

    #[tokio::test]
    async fn fetch_returns_each_object_once() {
        let mut refs = ExternalReferences::default();
        refs.secrets.insert(ObjectKey::new("default", "my-secret-a"));
        refs.config_maps.insert(ObjectKey::new("default", "my-cm-b"));

        let mut lookup = MockReferenceLookup::new();
        lookup
            .expect_get_secret()
            .times(1)
            .returning(|_, name| Ok(Some(named_secret(name))));
        lookup
            .expect_get_config_map()
            .times(1)
            .returning(|_, _| Ok(Some(ConfigMap::default())));

        let resolved = refs
            .fetch(Arc::new(lookup))
            .await
            .expect("fetch should succeed");
        assert_eq!(resolved.secrets.len(), 1);
        assert_eq!(resolved.config_maps.len(), 1);
        assert!(resolved
            .secrets
            .contains_key(&ObjectKey::new("default", "my-secret-a")));
    }

    /// Story: a missing secret fails the whole fetch
    #[tokio::test]
    async fn story_missing_object_is_a_hard_error() {
        let mut refs = ExternalReferences::default();
        refs.secrets.insert(ObjectKey::new("default", "present"));
        refs.secrets.insert(ObjectKey::new("default", "absent"));

        let mut lookup = MockReferenceLookup::new();
        lookup.expect_get_secret().returning(|_, name| {
            if name == "absent" {
                Ok(None)
            } else {
                Ok(Some(named_secret(name)))
            }
        });

        let err = refs.fetch(Arc::new(lookup)).await.unwrap_err();
        assert!(matches!(err, Error::MissingDependency { ref name, .. } if name == "absent"));
        assert_eq!(err.to_string(), "secret default/absent not found");
    }

    struct CountingLookup {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl ReferenceLookup for CountingLookup {
        async fn get_secret(&self, _namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            for _ in 0..5 {
                tokio::task::yield_now().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Some(named_secret(name)))
        }

        async fn get_config_map(
            &self,
            _namespace: &str,
            _name: &str,
        ) -> Result<Option<ConfigMap>, Error> {
            Ok(Some(ConfigMap::default()))
        }
    }

    #[tokio::test]
    async fn fetch_respects_concurrency_ceiling() {
        let mut refs = ExternalReferences::default();
        for i in 0..25 {
            refs.secrets.insert(ObjectKey::new("default", format!("secret-{i}")));
        }
        let lookup = Arc::new(CountingLookup {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });

        let resolved = refs.fetch(lookup.clone()).await.unwrap();
        assert_eq!(resolved.secrets.len(), 25);
        let max = lookup.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= MAX_CONCURRENT_FETCHES, "max in flight was {max}");
        assert!(max > 1, "fetches should overlap");
    }
}
