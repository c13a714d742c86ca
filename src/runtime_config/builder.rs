//! Builds a [`RuntimeConfigDocument`] from a SpinApp

use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMapKeySelector, SecretKeySelector};
use kube::ResourceExt;
use tracing::{debug, instrument};

use super::deps::{extract_references, ObjectKey, ReferenceLookup, ResolvedDependencies};
use super::{BindingCategory, OptionMap, RuntimeConfigDocument};
use crate::crd::{RuntimeBinding, RuntimeConfigOption, SpinApp};
use crate::secret::SecretString;
use crate::Error;

/// Resolves a SpinApp's runtime config against the cluster
#[derive(Clone)]
pub struct RuntimeConfigBuilder {
    lookup: Arc<dyn ReferenceLookup>,
}

impl RuntimeConfigBuilder {
    /// Create a builder fetching references through `lookup`
    pub fn new(lookup: Arc<dyn ReferenceLookup>) -> Self {
        Self { lookup }
    }

    /// Fetch the app's dependencies and build its document.
    ///
    /// Returns `None` when the app supplies a verbatim config through
    /// `loadFromSecret`.
    #[instrument(skip(self, app), fields(app = %app.name_any()))]
    pub async fn build(&self, app: &SpinApp) -> Result<Option<RuntimeConfigDocument>, Error> {
        let refs = extract_references(app);
        let resolved = refs.fetch(self.lookup.clone()).await?;
        debug!(
            secrets = resolved.secrets.len(),
            config_maps = resolved.config_maps.len(),
            "resolved runtime config dependencies"
        );

        if app.spec.runtime_config.verbatim_secret().is_some() {
            return Ok(None);
        }
        build_document(app, &resolved).map(Some)
    }
}

/// Build the document from already fetched dependencies
pub fn build_document(
    app: &SpinApp,
    resolved: &ResolvedDependencies,
) -> Result<RuntimeConfigDocument, Error> {
    let namespace = app.namespace().unwrap_or_default();
    let runtime_config = &app.spec.runtime_config;
    let mut doc = RuntimeConfigDocument::with_env_provider();

    for kv in &runtime_config.key_value_stores {
        add_named(&mut doc, BindingCategory::KeyValueStore, kv, &namespace, resolved)?;
    }
    for db in &runtime_config.sqlite_databases {
        add_named(&mut doc, BindingCategory::SqliteDatabase, db, &namespace, resolved)?;
    }
    if let Some(llm) = &runtime_config.llm_compute {
        let options = resolve_options(&llm.type_, &llm.options, &namespace, resolved)?;
        doc.add_binding(BindingCategory::LlmCompute, "", options)?;
    }

    Ok(doc)
}

fn add_named(
    doc: &mut RuntimeConfigDocument,
    category: BindingCategory,
    binding: &RuntimeBinding,
    namespace: &str,
    resolved: &ResolvedDependencies,
) -> Result<(), Error> {
    let options = resolve_options(&binding.type_, &binding.options, namespace, resolved)?;
    doc.add_binding(category, &binding.name, options)
}

fn resolve_options(
    type_: &str,
    options: &[RuntimeConfigOption],
    namespace: &str,
    resolved: &ResolvedDependencies,
) -> Result<OptionMap, Error> {
    let mut map = OptionMap::new();
    for option in options {
        let value = resolve_value(option, namespace, resolved)?;
        map.insert(option.name.clone(), value);
    }
    // the binding tag always wins over a user option named `type`
    map.insert("type".to_string(), SecretString::new(type_));
    Ok(map)
}

fn resolve_value(
    option: &RuntimeConfigOption,
    namespace: &str,
    resolved: &ResolvedDependencies,
) -> Result<SecretString, Error> {
    if let Some(value) = option.value.as_deref().filter(|v| !v.is_empty()) {
        return Ok(SecretString::new(value));
    }
    let Some(source) = &option.value_from else {
        return Ok(SecretString::default());
    };

    if let Some(selector) = &source.config_map_key_ref {
        return config_map_value(selector, namespace, resolved);
    }
    if let Some(selector) = &source.secret_key_ref {
        return secret_value(selector, namespace, resolved);
    }
    Ok(SecretString::default())
}

fn config_map_value(
    selector: &ConfigMapKeySelector,
    namespace: &str,
    resolved: &ResolvedDependencies,
) -> Result<SecretString, Error> {
    let key = ObjectKey::new(namespace, &selector.name);
    let cm = resolved
        .config_maps
        .get(&key)
        .ok_or_else(|| unmet("configmap", &key))?;
    let value = cm
        .data
        .as_ref()
        .and_then(|data| data.get(&selector.key))
        .cloned()
        .unwrap_or_default();
    Ok(SecretString::new(value))
}

fn secret_value(
    selector: &SecretKeySelector,
    namespace: &str,
    resolved: &ResolvedDependencies,
) -> Result<SecretString, Error> {
    let key = ObjectKey::new(namespace, &selector.name);
    let secret = resolved
        .secrets
        .get(&key)
        .ok_or_else(|| unmet("secret", &key))?;

    let from_data = secret
        .data
        .as_ref()
        .and_then(|data| data.get(&selector.key))
        .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned());
    let value = from_data
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|data| data.get(&selector.key))
                .cloned()
        })
        .unwrap_or_default();
    Ok(SecretString::new(value))
}

fn unmet(kind: &str, key: &ObjectKey) -> Error {
    Error::internal_with_context(
        "runtime_config",
        format!("unmet dependency while building config: {kind} ({key}) not found"),
    )
}
