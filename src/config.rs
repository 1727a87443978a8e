//! Loading of per-environment job settings from a JSON document
use serde::Deserialize;
use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// The branch of the config document to read settings from
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, strum::AsRefStr, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Environment {
    Development,
    #[default]
    Local,
}

impl FromStr for Environment {
    type Err = Infallible;

    /// `"development"` selects the development branch; every other tag falls
    /// back to the local branch.
    fn from_str(s: &str) -> Result<Environment, Infallible> {
        if s == "development" {
            Ok(Environment::Development)
        } else {
            Ok(Environment::Local)
        }
    }
}

/// Validated settings for a single run
#[derive(Clone, Eq, PartialEq)]
pub(crate) struct Settings {
    key: String,
    secret: String,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    remote_incoming: String,
    local_incoming: PathBuf,
    local_archive: PathBuf,
    store_url: String,
    store_token: String,
}

impl Settings {
    /// Access key ID for the storage account
    pub(crate) fn key(&self) -> Result<&str, ConfigError> {
        nonempty(&self.key, "creds.key")
    }

    /// Secret access key for the storage account
    pub(crate) fn secret(&self) -> Result<&str, ConfigError> {
        nonempty(&self.secret, "creds.secret")
    }

    /// Bucket holding the incoming stock files
    pub(crate) fn bucket(&self) -> Result<&str, ConfigError> {
        nonempty(&self.bucket, "aws.bucket")
    }

    pub(crate) fn region(&self) -> Result<&str, ConfigError> {
        nonempty(&self.region, "aws.region")
    }

    /// Custom S3-compatible endpoint, if one is configured
    pub(crate) fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Key prefix under which incoming stock files are uploaded
    pub(crate) fn remote_incoming(&self) -> Result<&str, ConfigError> {
        nonempty(&self.remote_incoming, "aws.incoming")
    }

    /// Local directory into which incoming files are downloaded
    pub(crate) fn local_incoming(&self) -> Result<&Path, ConfigError> {
        nonempty_path(&self.local_incoming, "folders.incoming")
    }

    /// Local directory into which processed files are moved
    pub(crate) fn local_archive(&self) -> Result<&Path, ConfigError> {
        nonempty_path(&self.local_archive, "folders.archive")
    }

    /// Base URL of the stock API
    pub(crate) fn store_url(&self) -> Result<&str, ConfigError> {
        nonempty(&self.store_url, "store.url")
    }

    /// Bearer token for the stock API
    pub(crate) fn store_token(&self) -> Result<&str, ConfigError> {
        nonempty(&self.store_token, "store.token")
    }
}

#[cfg(test)]
impl Settings {
    /// Settings pointing at the given local directories, with fixed remote
    /// values
    pub(crate) fn for_dirs(local_incoming: &Path, local_archive: &Path) -> Settings {
        Settings {
            key: String::from("AKITEST"),
            secret: String::from("testsecret"),
            bucket: String::from("stock"),
            region: String::from("us-east-1"),
            endpoint: None,
            remote_incoming: String::from("incoming/"),
            local_incoming: local_incoming.to_owned(),
            local_archive: local_archive.to_owned(),
            store_url: String::from("http://localhost:8080"),
            store_token: String::from("testtoken"),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("remote_incoming", &self.remote_incoming)
            .field("local_incoming", &self.local_incoming)
            .field("local_archive", &self.local_archive)
            .field("store_url", &self.store_url)
            .field("store_token", &"<redacted>")
            .finish()
    }
}

fn nonempty<'a>(value: &'a str, field: &'static str) -> Result<&'a str, ConfigError> {
    if value.is_empty() {
        Err(ConfigError::Empty { field })
    } else {
        Ok(value)
    }
}

fn nonempty_path<'a>(value: &'a Path, field: &'static str) -> Result<&'a Path, ConfigError> {
    if value.as_os_str().is_empty() {
        Err(ConfigError::Empty { field })
    } else {
        Ok(value)
    }
}

/// Read the config document at `path` and extract the settings for
/// `environment`
pub(crate) fn load(path: &Path, environment: Environment) -> Result<Settings, ConfigError> {
    let content = match fs_err::read_to_string(path) {
        Ok(content) => content,
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_owned(),
                source,
            })
        }
    };
    parse(&content, environment).map_err(|e| e.at(path))
}

fn parse(content: &str, environment: Environment) -> Result<Settings, ConfigError> {
    let document: serde_json::Value =
        serde_json::from_str(content).map_err(|source| ConfigError::Parse {
            path: None,
            source,
        })?;
    if is_empty_document(&document) {
        return Err(ConfigError::EmptyDocument { path: None });
    }
    let Some(branch) = document.get(environment.as_ref()) else {
        return Err(ConfigError::MissingBranch { environment });
    };
    let raw = RawBranch::deserialize(branch).map_err(|source| ConfigError::Parse {
        path: None,
        source,
    })?;
    raw.validate()
}

fn is_empty_document(document: &serde_json::Value) -> bool {
    match document {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
struct RawBranch {
    creds: RawCreds,
    aws: RawAws,
    folders: RawFolders,
    store: RawStore,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
struct RawCreds {
    key: Option<String>,
    secret: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
struct RawAws {
    bucket: Option<String>,
    region: Option<String>,
    incoming: Option<String>,
    endpoint: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
struct RawFolders {
    incoming: Option<String>,
    archive: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
struct RawStore {
    url: Option<String>,
    token: Option<String>,
}

impl RawBranch {
    fn validate(self) -> Result<Settings, ConfigError> {
        Ok(Settings {
            key: require(self.creds.key, "creds.key")?,
            secret: require(self.creds.secret, "creds.secret")?,
            bucket: require(self.aws.bucket, "aws.bucket")?,
            region: require(self.aws.region, "aws.region")?,
            endpoint: self.aws.endpoint.filter(|s| !s.is_empty()),
            remote_incoming: require(self.aws.incoming, "aws.incoming")?,
            local_incoming: require(self.folders.incoming, "folders.incoming")?.into(),
            local_archive: require(self.folders.archive, "folders.archive")?.into(),
            store_url: require(self.store.url, "store.url")?,
            store_token: require(self.store.token, "store.token")?,
        })
    }
}

fn require(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(ConfigError::Empty { field }),
    }
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("failed to read config file {}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file{}", display_at(.path.as_deref()))]
    Parse {
        path: Option<PathBuf>,
        source: serde_json::Error,
    },
    #[error("config file{} is empty", display_at(.path.as_deref()))]
    EmptyDocument { path: Option<PathBuf> },
    #[error("config file has no \"{environment}\" section")]
    MissingBranch { environment: Environment },
    #[error("config value {field} is either empty or missing")]
    Empty { field: &'static str },
}

impl ConfigError {
    fn at(self, p: &Path) -> ConfigError {
        match self {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: Some(p.to_owned()),
                source,
            },
            ConfigError::EmptyDocument { .. } => ConfigError::EmptyDocument {
                path: Some(p.to_owned()),
            },
            e => e,
        }
    }
}

fn display_at(path: Option<&Path>) -> String {
    path.map(|p| format!(" {}", p.display()))
        .unwrap_or_default()
}
