use crate::RemoteError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: &str, password: &str) -> Self {
        Self {
            login: login.to_owned(),
            password: password.to_owned(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

/// Connection info for one instance in one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessInfo {
    pub url: String,
    pub credentials: Option<Credentials>,
}

/// Maps logical instance names to connection info.
///
/// Source catalogs are looked up by name, source map-services by URL, and
/// destinations by the name of the destination pair.
pub trait AccessResolver: Send + Sync {
    fn access_info(
        &self,
        is_source: bool,
        is_catalog: bool,
        instance_id: &str,
    ) -> Result<AccessInfo, RemoteError>;

    /// Base URLs of every configured source map-service.
    fn source_map_service_urls(&self) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredTransform {
    pub name: String,
    pub path: PathBuf,
    pub description: String,
}

/// Ordered transform chains per (source catalog, destination) pair.
pub trait TransformRegistry: Send + Sync {
    fn chain(&self, source: &str, destination: &str)
        -> Result<Vec<RegisteredTransform>, RemoteError>;
}

/// Login and password as found in the file. Numbers are accepted and kept
/// as their decimal text; an `*_env_var` entry names an environment
/// variable that overrides the literal value when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialFields {
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub login: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_env_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env_var: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value: Option<Scalar> = Option::deserialize(deserializer)?;
    Ok(value.map(|s| match s {
        Scalar::Str(s) => s,
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Bool(b) => b.to_string(),
    }))
}

impl CredentialFields {
    /// Fill unset values from `common`, then apply the `*_env_var`
    /// overrides. The env var keys are consumed. Returns the resulting
    /// pair so it can serve as `common` for nested instances.
    fn resolve(
        &mut self,
        common: &(Option<String>, Option<String>),
        env: &dyn Fn(&str) -> Option<String>,
    ) -> (Option<String>, Option<String>) {
        if self.login.is_none() {
            self.login.clone_from(&common.0);
        }
        if self.password.is_none() {
            self.password.clone_from(&common.1);
        }
        if let Some(var) = self.login_env_var.take() {
            if let Some(value) = env(&var) {
                self.login = Some(value);
            }
        }
        if let Some(var) = self.password_env_var.take() {
            if let Some(value) = env(&var) {
                self.password = Some(value);
            }
        }
        (self.login.clone(), self.password.clone())
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.login, &self.password) {
            (Some(login), Some(password)) => Some(Credentials::new(login, password)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSource {
    pub name: String,
    pub api_url: String,
    #[serde(flatten)]
    pub credentials: CredentialFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapServiceSource {
    pub url: String,
    #[serde(flatten)]
    pub credentials: CredentialFields,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(flatten)]
    pub credentials: CredentialFields,
    #[serde(default)]
    pub geonetwork_instances: Vec<CatalogSource>,
    #[serde(default)]
    pub geoserver_instances: Vec<MapServiceSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEndpoint {
    pub api_url: String,
    #[serde(flatten)]
    pub credentials: CredentialFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapServiceEndpoint {
    pub url: String,
    #[serde(flatten)]
    pub credentials: CredentialFields,
}

/// A destination pair: one catalog and one map-service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    #[serde(flatten)]
    pub credentials: CredentialFields,
    pub geonetwork: CatalogEndpoint,
    pub geoserver: MapServiceEndpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySettings {
    /// Keep going when creating a style descriptor on the destination
    /// fails; the style body upload that follows is still fatal.
    #[serde(default = "default_true")]
    pub tolerate_style_create_failure: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            tolerate_style_create_failure: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSettings {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceEntry {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationEntry {
    pub name: String,
    pub gn_url: String,
    pub gs_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub destinations: BTreeMap<String, DestinationConfig>,
    #[serde(default)]
    pub transformations: BTreeMap<String, TransformationConfig>,
    /// Source catalog name -> destination name -> transform names.
    #[serde(default)]
    pub transformation_paths: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub copy: CopySettings,
    #[serde(default)]
    pub audit: AuditSettings,
    /// Directory relative transform paths are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load from the file named by `env_var`, or an empty config when the
    /// variable is unset.
    pub fn load_from_env(env_var: &str) -> Result<Self, RemoteError> {
        match std::env::var_os(env_var) {
            Some(path) => Self::load(Path::new(&path)),
            None => {
                tracing::debug!("{env_var} not set, using an empty configuration");
                Ok(Self::default())
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RemoteError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let mut config = Self::from_yaml(&content, &|var| std::env::var(var).ok())?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parse and resolve credentials with `env` as the variable lookup.
    pub fn from_yaml(
        content: &str,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, RemoteError> {
        let mut config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| RemoteError::Config(format!("invalid config: {e}")))?
        };
        config.resolve_credentials(env);
        config.validate()?;
        Ok(config)
    }

    fn resolve_credentials(&mut self, env: &dyn Fn(&str) -> Option<String>) {
        let common = self.sources.credentials.resolve(&(None, None), env);
        for gn in &mut self.sources.geonetwork_instances {
            gn.credentials.resolve(&common, env);
        }
        for gs in &mut self.sources.geoserver_instances {
            gs.credentials.resolve(&common, env);
        }
        for dst in self.destinations.values_mut() {
            let common = dst.credentials.resolve(&(None, None), env);
            dst.geonetwork.credentials.resolve(&common, env);
            dst.geoserver.credentials.resolve(&common, env);
        }
    }

    fn validate(&self) -> Result<(), RemoteError> {
        for (src, dsts) in &self.transformation_paths {
            for (dst, names) in dsts {
                if let Some(name) = names.iter().find(|n| !self.transformations.contains_key(*n)) {
                    return Err(RemoteError::Config(format!(
                        "transformation path {src} -> {dst} names unknown transformation '{name}'"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn source_catalogs(&self) -> Vec<SourceEntry> {
        self.sources
            .geonetwork_instances
            .iter()
            .map(|gn| SourceEntry {
                name: gn.name.clone(),
                url: gn.api_url.clone(),
            })
            .collect()
    }

    pub fn destination_entries(&self) -> Vec<DestinationEntry> {
        self.destinations
            .iter()
            .map(|(name, dst)| DestinationEntry {
                name: name.clone(),
                gn_url: dst.geonetwork.api_url.clone(),
                gs_url: dst.geoserver.url.clone(),
            })
            .collect()
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn registered_transforms(&self) -> Vec<RegisteredTransform> {
        self.transformations
            .iter()
            .map(|(name, t)| RegisteredTransform {
                name: name.clone(),
                path: self.resolve_path(&t.path),
                description: t.description.clone(),
            })
            .collect()
    }
}

fn not_found(is_source: bool, is_catalog: bool, id: &str) -> RemoteError {
    RemoteError::NotFound(format!(
        "Key '{id}' could not be found among configured {} {} servers.",
        if is_catalog { "geonetwork" } else { "geoserver" },
        if is_source { "source" } else { "destination" },
    ))
}

impl AccessResolver for AppConfig {
    fn access_info(
        &self,
        is_source: bool,
        is_catalog: bool,
        instance_id: &str,
    ) -> Result<AccessInfo, RemoteError> {
        let (url, fields) = match (is_source, is_catalog) {
            (true, true) => self
                .sources
                .geonetwork_instances
                .iter()
                .find(|gn| gn.name == instance_id)
                .map(|gn| (&gn.api_url, &gn.credentials)),
            (true, false) => self
                .sources
                .geoserver_instances
                .iter()
                .find(|gs| gs.url == instance_id)
                .map(|gs| (&gs.url, &gs.credentials)),
            (false, true) => self
                .destinations
                .get(instance_id)
                .map(|d| (&d.geonetwork.api_url, &d.geonetwork.credentials)),
            (false, false) => self
                .destinations
                .get(instance_id)
                .map(|d| (&d.geoserver.url, &d.geoserver.credentials)),
        }
        .ok_or_else(|| not_found(is_source, is_catalog, instance_id))?;
        Ok(AccessInfo {
            url: url.clone(),
            credentials: fields.credentials(),
        })
    }

    fn source_map_service_urls(&self) -> Vec<String> {
        self.sources
            .geoserver_instances
            .iter()
            .map(|gs| gs.url.clone())
            .collect()
    }
}

impl TransformRegistry for AppConfig {
    fn chain(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<Vec<RegisteredTransform>, RemoteError> {
        let Some(names) = self
            .transformation_paths
            .get(source)
            .and_then(|dsts| dsts.get(destination))
        else {
            return Ok(Vec::new());
        };
        names
            .iter()
            .map(|name| {
                let t = self.transformations.get(name).ok_or_else(|| {
                    RemoteError::Config(format!("unknown transformation '{name}'"))
                })?;
                Ok(RegisteredTransform {
                    name: name.clone(),
                    path: self.resolve_path(&t.path),
                    description: t.description.clone(),
                })
            })
            .collect()
    }
}
