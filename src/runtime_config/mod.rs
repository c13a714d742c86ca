//! Spin runtime configuration rendering
//!
//! A SpinApp describes its runtime bindings as "type plus a list of options"
//! because the real Spin schema varies per backend type and can't be modelled
//! cleanly in a CRD. This module turns that declaration into the TOML document
//! Spin reads at startup:
//!
//! 1. [`deps`] extracts every Secret/ConfigMap the options reference,
//!    deduplicated per object, and fetches them with bounded concurrency.
//! 2. [`builder`] walks the bindings again with the fetched objects in hand
//!    and fills a [`RuntimeConfigDocument`].
//! 3. The document is rendered to TOML and stored in a Secret whose name is
//!    derived from a checksum of the rendered bytes.
//!
//! Option bags are passed through untouched: no per-type validation is done,
//! so custom Spin builds with unknown backend types keep working.
//!
//! ```toml
//! [[config_provider]]
//! type = "env"
//! prefix = "SPIN_VARIABLE_"
//!
//! [key_value_store.default]
//! type = "redis"
//! url = "redis://localhost:9000"
//! ```

pub mod builder;
pub mod deps;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::secret::SecretString;
use crate::Error;

pub use builder::RuntimeConfigBuilder;
pub use deps::{extract_references, ExternalReferences, ObjectKey, ReferenceLookup};

/// Prefix Spin uses to read variables from the environment
pub const VARIABLE_ENV_PREFIX: &str = "SPIN_VARIABLE_";

/// Key of the rendered document inside its Secret
pub const RUNTIME_CONFIG_KEY: &str = "runtime-config.toml";

/// Resolved options of one binding, always including `type`
pub type OptionMap = BTreeMap<String, SecretString>;

/// Source of Spin variables
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VariablesProvider {
    /// Read variables from environment variables with the given prefix
    Env {
        /// Environment variable prefix
        prefix: String,
    },
}

/// Category of a runtime binding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingCategory {
    /// `[key_value_store.<name>]`
    KeyValueStore,
    /// `[sqlite_database.<name>]`
    SqliteDatabase,
    /// `[llm_compute]`
    LlmCompute,
}

impl BindingCategory {
    fn describe(self) -> &'static str {
        match self {
            Self::KeyValueStore => "key value store",
            Self::SqliteDatabase => "sqlite database",
            Self::LlmCompute => "llm compute",
        }
    }
}

/// A fully resolved Spin runtime config
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RuntimeConfigDocument {
    #[serde(rename = "config_provider", skip_serializing_if = "Vec::is_empty")]
    variable_providers: Vec<VariablesProvider>,

    #[serde(rename = "key_value_store", skip_serializing_if = "BTreeMap::is_empty")]
    key_value_stores: BTreeMap<String, OptionMap>,

    #[serde(rename = "sqlite_database", skip_serializing_if = "BTreeMap::is_empty")]
    sqlite_databases: BTreeMap<String, OptionMap>,

    #[serde(rename = "llm_compute", skip_serializing_if = "Option::is_none")]
    llm_compute: Option<OptionMap>,
}

impl RuntimeConfigDocument {
    /// Document seeded with the environment variables provider.
    ///
    /// The prefix matches Spin's default; setting it explicitly protects
    /// against the default changing.
    pub fn with_env_provider() -> Self {
        Self {
            variable_providers: vec![VariablesProvider::Env {
                prefix: VARIABLE_ENV_PREFIX.to_string(),
            }],
            ..Default::default()
        }
    }

    /// Add a resolved binding.
    ///
    /// Names must be unique within a category. There is a single compute
    /// binding, so `name` is ignored for [`BindingCategory::LlmCompute`].
    pub fn add_binding(
        &mut self,
        category: BindingCategory,
        name: &str,
        options: OptionMap,
    ) -> Result<(), Error> {
        let target = match category {
            BindingCategory::KeyValueStore => &mut self.key_value_stores,
            BindingCategory::SqliteDatabase => &mut self.sqlite_databases,
            BindingCategory::LlmCompute => {
                self.llm_compute = Some(options);
                return Ok(());
            }
        };

        if target.contains_key(name) {
            return Err(Error::runtime_config(format!(
                "duplicate definition for {} with name: {}",
                category.describe(),
                name
            )));
        }
        target.insert(name.to_string(), options);
        Ok(())
    }

    /// Variable providers in declaration order
    pub fn variable_providers(&self) -> &[VariablesProvider] {
        &self.variable_providers
    }

    /// Resolved key-value stores by name
    pub fn key_value_stores(&self) -> &BTreeMap<String, OptionMap> {
        &self.key_value_stores
    }

    /// Resolved SQLite databases by name
    pub fn sqlite_databases(&self) -> &BTreeMap<String, OptionMap> {
        &self.sqlite_databases
    }

    /// Resolved compute binding
    pub fn llm_compute(&self) -> Option<&OptionMap> {
        self.llm_compute.as_ref()
    }

    /// Render the document as TOML. Output is deterministic for equal
    /// documents since every map is ordered.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string(self)
            .map_err(|e| Error::serialization_for_kind("RuntimeConfig", e.to_string()))
    }
}

/// Content-addressed name of the Secret holding a rendered document:
/// `<app>-<adler32 of the document as 8 hex digits>`.
pub fn secret_name(app_name: &str, rendered: &str) -> String {
    let mut hasher = adler::Adler32::new();
    hasher.write_slice(rendered.as_bytes());
    format!("{}-{:08x}", app_name, hasher.checksum())
}
