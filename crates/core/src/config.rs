//! Configuration types shared across crates.
//!
//! Configuration is layered with figment, later layers winning:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. the environment variables understood by existing deployments
//!    (`TURBOREPO_ALLOWED_TOKENS`, `AWS_*`, `PORT`)
//! 4. `CAIRN_`-prefixed variables, nested with `__`
//!    (e.g. `CAIRN_STORAGE__BUCKET=my-bucket`)

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Prefix for native environment overrides.
pub const ENV_PREFIX: &str = "CAIRN_";

/// Environment variables inherited from existing deployments and the
/// configuration keys they populate.
pub const LEGACY_ENV_VARS: &[(&str, &str)] = &[
    ("TURBOREPO_ALLOWED_TOKENS", "auth.allowed_tokens"),
    ("AWS_REGION", "storage.region"),
    ("AWS_ENDPOINT", "storage.endpoint"),
    ("AWS_ACCESS_KEY_ID", "storage.access_key_id"),
    ("AWS_SECRET_ACCESS_KEY", "storage.secret_access_key"),
    ("AWS_DISABLE_SSL", "storage.disable_ssl"),
    ("AWS_S3_BUCKET", "storage.bucket"),
    ("AWS_S3_FORCE_PATH_STYLE", "storage.force_path_style"),
];

/// Legacy variable for the listen port. Unlike the variables above its
/// value is parsed, so `PORT=3000` reaches `server.port` as a number.
pub const LEGACY_PORT_VAR: &str = "PORT";

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port override. When set, replaces the port of `bind`.
    #[serde(default)]
    pub port: Option<u16>,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Report storage faults on download as 404 instead of 500, matching
    /// deployments that predate the distinction.
    #[serde(default)]
    pub legacy_download_errors: bool,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: None,
            metrics_enabled: default_metrics_enabled(),
            legacy_download_errors: false,
        }
    }
}

impl ServerConfig {
    /// Resolve the socket address to listen on.
    pub fn bind_addr(&self) -> crate::Result<SocketAddr> {
        let mut addr: SocketAddr = self.bind.parse().map_err(|e| {
            crate::Error::Config(format!("invalid bind address {:?}: {e}", self.bind))
        })?;
        if let Some(port) = self.port {
            addr.set_port(port);
        }
        Ok(addr)
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        #[serde(default = "default_bucket")]
        bucket: String,
        /// Optional endpoint URL or host (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the SDK's default credential chain if not set.
        access_key_id: Option<String>,
        /// AWS secret access key.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default, deserialize_with = "flag")]
        force_path_style: bool,
        /// Use plain HTTP for an endpoint given without a scheme.
        #[serde(default, deserialize_with = "flag")]
        disable_ssl: bool,
    },
}

fn default_bucket() -> String {
    "turborepo-cache".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::S3 {
            bucket: default_bucket(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
            disable_ssl: false,
        }
    }
}

/// An on/off switch as existing deployments spell it: a boolean, or a
/// string where exactly `"true"` turns it on. Any other value is off.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    struct FlagVisitor;

    impl Visitor<'_> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a boolean or a string")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v == "true")
        }

        fn visit_u64<E: de::Error>(self, _: u64) -> Result<Self::Value, E> {
            Ok(false)
        }

        fn visit_i64<E: de::Error>(self, _: i64) -> Result<Self::Value, E> {
            Ok(false)
        }

        fn visit_f64<E: de::Error>(self, _: f64) -> Result<Self::Value, E> {
            Ok(false)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(false)
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}

/// Treat an empty string the same as an unset value.
pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Explicit S3 credentials as an `(access_key_id, secret_access_key)` pair.
///
/// `None` means neither is set and the SDK's default chain applies. Setting
/// only one of the two is an error.
pub fn credential_pair<'a>(
    access_key_id: &'a Option<String>,
    secret_access_key: &'a Option<String>,
) -> Result<Option<(&'a str, &'a str)>, String> {
    match (non_empty(access_key_id), non_empty(secret_access_key)) {
        (Some(id), Some(secret)) => Ok(Some((id, secret))),
        (None, None) => Ok(None),
        _ => Err(
            "s3 config requires both access_key_id and secret_access_key when either is set"
                .to_string(),
        ),
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("s3 config requires a bucket name".to_string());
                }
                credential_pair(access_key_id, secret_access_key).map(|_| ())
            }
            StorageConfig::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    Err("filesystem config requires a path".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// A list of bearer tokens.
///
/// Accepts either a comma-separated string (`"tok-a,tok-b"`) or a list.
/// Scalar entries are accepted as tokens too, since `CAIRN_` environment
/// values such as `12345` or `true` arrive as numbers and booleans.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TokenList(Vec<String>);

impl TokenList {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tokens.into_iter().map(Into::into).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Debug for TokenList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenList(<{} redacted>)", self.0.len())
    }
}

struct TokenEntry(String);

impl<'de> Deserialize<'de> for TokenEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntryVisitor;

        impl Visitor<'_> for EntryVisitor {
            type Value = TokenEntry;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a token string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(TokenEntry(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(TokenEntry(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(TokenEntry(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(TokenEntry(v.to_string()))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(TokenEntry(v.to_string()))
            }
        }

        deserializer.deserialize_any(EntryVisitor)
    }
}

impl<'de> Deserialize<'de> for TokenList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = TokenList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a comma-separated string or a list of tokens")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(TokenList::new(v.split(',')))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(TokenList(vec![v.to_string()]))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(TokenList(vec![v.to_string()]))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(TokenList(vec![v.to_string()]))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(TokenList(vec![v.to_string()]))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut tokens = Vec::new();
                while let Some(TokenEntry(token)) = seq.next_element()? {
                    tokens.push(token);
                }
                Ok(TokenList(tokens))
            }
        }

        deserializer.deserialize_any(ListVisitor)
    }
}

/// Authorization configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer tokens accepted by the cache.
    #[serde(default)]
    pub allowed_tokens: TokenList,
}

impl AuthConfig {
    /// Build the lookup set used by request authorization.
    pub fn token_set(&self) -> crate::token::TokenSet {
        crate::token::TokenSet::new(self.allowed_tokens.iter())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Authorization configuration.
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Build the layered figment. A missing config file is not an error.
    pub fn figment(config_path: Option<&Path>) -> Figment {
        // The storage tag must exist before env vars add fields to the table.
        let mut figment = Figment::new().merge(Serialized::default("storage.type", "s3"));

        if let Some(path) = config_path.filter(|p| p.exists()) {
            figment = figment.merge(Toml::file(path));
        }

        // Legacy values are taken verbatim, so a token such as `1.50` or a
        // bucket such as `12345` is not reinterpreted as a number.
        let legacy = Env::raw()
            .only(&LEGACY_ENV_VARS.iter().map(|(var, _)| *var).collect::<Vec<_>>())
            .map(|key| {
                LEGACY_ENV_VARS
                    .iter()
                    .find(|(var, _)| key == *var)
                    .map(|(_, path)| (*path).into())
                    .unwrap_or_else(|| key.as_str().into())
            });
        for (path, value) in legacy.iter() {
            figment = figment.merge(Serialized::default(path.as_str(), value));
        }

        figment
            .merge(
                Env::raw()
                    .only(&[LEGACY_PORT_VAR])
                    .map(|_| "server.port".into()),
            )
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate configuration.
    pub fn load(config_path: Option<&Path>) -> crate::Result<Self> {
        let config: Self = Self::figment(config_path)
            .extract()
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants.
    pub fn validate(&self) -> crate::Result<()> {
        self.storage.validate().map_err(crate::Error::Config)?;
        if self.auth.token_set().is_empty() {
            return Err(crate::Error::Config(
                "no allowed tokens configured; set TURBOREPO_ALLOWED_TOKENS or auth.allowed_tokens"
                    .to_string(),
            ));
        }
        self.server.bind_addr()?;
        Ok(())
    }

    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage and a single token,
    /// `test-token`.
    pub fn for_testing(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::Filesystem {
                path: storage_path.into(),
            },
            auth: AuthConfig {
                allowed_tokens: TokenList::new(["test-token"]),
            },
        }
    }
}
