//! # Transfer configuration
//!
//! Two layers, merged once at the start of every call:
//!
//! - [`TransferConfig`]: process-wide defaults, built at startup (builder
//!   methods, string `set()` or environment variables).
//! - [`TransferOptions`]: per-call overrides. Every `Some` field replaces the
//!   default; `extra` keys are merged key by key and handed to the adapter
//!   unexamined.
//!
//! ```rust
//! use dog_transfer::{TransferConfig, TransferOptions};
//!
//! let mut config = TransferConfig::new();
//! config.set("dirpath", "/var/uploads").unwrap();
//!
//! let merged = config.merged(&TransferOptions::new().with_extname(".png"));
//! assert_eq!(merged.dirpath.as_deref(), Some("/var/uploads"));
//! assert_eq!(merged.extname.as_deref(), Some(".png"));
//! ```
//!
//! Environment overrides use the `PREFIX__KEY` convention:
//!
//! ```bash
//! export DOG_TRANSFER__DIRPATH=/var/uploads
//! export DOG_TRANSFER__ENVIRONMENT=production
//! ```

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::{AdapterSource, Done, Encoding, StorageAdapter, StreamMeta, TransferError, TransferResult};

/// Default storage root, relative to the app path
pub const DEFAULT_DIRPATH: &str = ".tmp/uploads";

/// Prefix read by [`TransferConfig::from_env`] callers by convention
pub const ENV_PREFIX: &str = "DOG_TRANSFER__";

/// Callback computing a basename from a stream's hints. It must complete
/// `done` with a non-empty string (or an error).
pub type SaveAsFn = Arc<dyn Fn(&StreamMeta, Done<String>) + Send + Sync>;

/// How an incoming stream should be named in storage
#[derive(Clone)]
pub enum SaveAs {
    /// Use this basename verbatim
    Literal(String),
    /// Ask user code for the basename
    Callback(SaveAsFn),
}

impl SaveAs {
    pub fn literal(basename: impl Into<String>) -> Self {
        SaveAs::Literal(basename.into())
    }

    /// Callback style: complete `done` exactly once
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&StreamMeta, Done<String>) + Send + Sync + 'static,
    {
        SaveAs::Callback(Arc::new(f))
    }

    /// Async style: the returned future's output is the basename
    pub fn compute<F, Fut>(f: F) -> Self
    where
        F: Fn(&StreamMeta) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TransferResult<String>> + Send + 'static,
    {
        Self::callback(move |meta, done| {
            let naming = f(meta);
            tokio::spawn(async move {
                done.complete(naming.await);
            });
        })
    }
}

impl fmt::Debug for SaveAs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveAs::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            SaveAs::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Per-call options
#[derive(Clone, Default)]
pub struct TransferOptions {
    /// Storage capability or a factory producing one
    pub adapter: Option<AdapterSource>,
    /// Storage root
    pub dirpath: Option<String>,
    /// Directory prefix joined onto generated descriptors
    pub dirname: Option<String>,
    /// Suffix for generated names (default `.upload`)
    pub extname: Option<String>,
    pub save_as: Option<SaveAs>,
    /// Target encoding for drains
    pub encoding: Option<Encoding>,
    /// Unrecognised keys, passed through to the adapter
    pub extra: Map<String, Value>,
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter<A: StorageAdapter + 'static>(mut self, adapter: A) -> Self {
        self.adapter = Some(AdapterSource::instance(adapter));
        self
    }

    pub fn with_adapter_source(mut self, source: AdapterSource) -> Self {
        self.adapter = Some(source);
        self
    }

    pub fn with_dirpath(mut self, dirpath: impl Into<String>) -> Self {
        self.dirpath = Some(dirpath.into());
        self
    }

    pub fn with_dirname(mut self, dirname: impl Into<String>) -> Self {
        self.dirname = Some(dirname.into());
        self
    }

    pub fn with_extname(mut self, extname: impl Into<String>) -> Self {
        self.extname = Some(extname.into());
        self
    }

    pub fn with_save_as(mut self, save_as: SaveAs) -> Self {
        self.save_as = Some(save_as);
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Parse loosely-typed overrides (e.g. from a JSON request or config file).
    ///
    /// Recognised keys with the wrong type fail here, before any I/O. The
    /// adapter cannot be expressed in JSON and must be set programmatically.
    pub fn from_json(value: Value) -> TransferResult<Self> {
        let Value::Object(map) = value else {
            return Err(TransferError::usage(format!(
                "Invalid options: expected a dictionary, but got: {}",
                value
            )));
        };

        let mut options = Self::new();
        for (key, value) in map {
            match key.as_str() {
                "adapter" => {
                    return Err(TransferError::usage(
                        "Invalid `adapter`: adapters must be provided programmatically, not as data.",
                    ))
                }
                "dirpath" => options.dirpath = Some(expect_string("dirpath", value)?),
                "dirname" => options.dirname = Some(expect_string("dirname", value)?),
                "extname" => options.extname = Some(expect_string("extname", value)?),
                "saveAs" | "save_as" => match value {
                    Value::String(s) => options.save_as = Some(SaveAs::Literal(s)),
                    Value::Null => {}
                    other => {
                        return Err(TransferError::usage(format!(
                            "Invalid `saveAs`:  If specified, must be a string or a function.  Instead, got: {}",
                            other
                        )))
                    }
                },
                "encoding" => {
                    let raw = expect_string("encoding", value)?;
                    options.encoding = Some(parse_encoding(&raw)?);
                }
                _ => {
                    options.extra.insert(key, value);
                }
            }
        }
        Ok(options)
    }

    /// Overlay `more` on top of `self`
    pub fn merge(&self, more: &TransferOptions) -> TransferOptions {
        let mut extra = self.extra.clone();
        for (key, value) in &more.extra {
            extra.insert(key.clone(), value.clone());
        }
        TransferOptions {
            adapter: more.adapter.clone().or_else(|| self.adapter.clone()),
            dirpath: more.dirpath.clone().or_else(|| self.dirpath.clone()),
            dirname: more.dirname.clone().or_else(|| self.dirname.clone()),
            extname: more.extname.clone().or_else(|| self.extname.clone()),
            save_as: more.save_as.clone().or_else(|| self.save_as.clone()),
            encoding: more.encoding.or(self.encoding),
            extra,
        }
    }

    /// `filename` is ambiguous with computed naming and always rejected
    pub fn ensure_no_filename(&self) -> TransferResult<()> {
        if self.extra.contains_key("filename") {
            return Err(TransferError::usage(
                "The `filename` option is not supported.  Please use `save_as` or `extname`.",
            ));
        }
        Ok(())
    }

    /// Check the naming options of an upload before any I/O
    pub fn validate_for_upload(&self) -> TransferResult<()> {
        self.ensure_no_filename()?;
        if matches!(self.extname.as_deref(), Some("")) {
            return Err(TransferError::usage(
                "Invalid `extname`: If specified, must be a non-empty string.",
            ));
        }
        if matches!(self.dirname.as_deref(), Some("")) {
            return Err(TransferError::usage(
                "Invalid `dirname`: If specified, must be a non-empty string.",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferOptions")
            .field("adapter", &self.adapter.as_ref().map(|_| ".."))
            .field("dirpath", &self.dirpath)
            .field("dirname", &self.dirname)
            .field("extname", &self.extname)
            .field("save_as", &self.save_as)
            .field("encoding", &self.encoding)
            .field("extra", &self.extra)
            .finish()
    }
}

fn parse_encoding(raw: &str) -> TransferResult<Encoding> {
    Encoding::parse(raw).ok_or_else(|| {
        TransferError::usage(format!(
            "Invalid `encoding`: must be one of \"utf8\", \"utf-8\", \"base64\", \"raw\", \"binary\" or \"latin1\".  Instead, got: {:?}",
            raw
        ))
    })
}

fn expect_string(key: &str, value: Value) -> TransferResult<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(TransferError::usage(format!(
            "Invalid `{}`: If specified, must be a non-empty string.  Instead, got: {}",
            key, other
        ))),
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "staging" => Some(Environment::Staging),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }
}

/// Process-wide transfer defaults
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Defaults every call's options are merged over
    pub defaults: TransferOptions,
    /// Base directory relative storage roots resolve against
    pub app_path: PathBuf,
    pub environment: Environment,
    /// Keep error omens in production
    pub debug: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            defaults: TransferOptions::new().with_dirpath(DEFAULT_DIRPATH),
            app_path: PathBuf::from("."),
            environment: Environment::Development,
            debug: false,
        }
    }
}

impl TransferConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load defaults from `PREFIX__KEY` environment variables.
    ///
    /// A non-empty `DEBUG` variable also turns on `debug`.
    pub fn from_env(prefix: &str) -> TransferResult<Self> {
        let mut config = Self::default();
        for (key, value) in std::env::vars() {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                config.set(normalized, value)?;
            }
        }
        if std::env::var("DEBUG").map(|v| !v.is_empty()).unwrap_or(false) {
            config.debug = true;
        }
        Ok(config)
    }

    pub fn with_adapter<A: StorageAdapter + 'static>(mut self, adapter: A) -> Self {
        self.defaults.adapter = Some(AdapterSource::instance(adapter));
        self
    }

    pub fn with_adapter_source(mut self, source: AdapterSource) -> Self {
        self.defaults.adapter = Some(source);
        self
    }

    pub fn with_dirpath(mut self, dirpath: impl Into<String>) -> Self {
        self.defaults.dirpath = Some(dirpath.into());
        self
    }

    pub fn with_app_path(mut self, app_path: impl Into<PathBuf>) -> Self {
        self.app_path = app_path.into();
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set a configuration key from a string value.
    ///
    /// Unknown keys become pass-through defaults for the adapter.
    pub fn set<K, V>(&mut self, key: K, value: V) -> TransferResult<()>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            "dirpath" => self.defaults.dirpath = Some(value),
            "dirname" => self.defaults.dirname = Some(value),
            "extname" => self.defaults.extname = Some(value),
            "app_path" | "apppath" | "appPath" => self.app_path = PathBuf::from(value),
            "environment" | "env" => {
                self.environment = Environment::parse(&value).ok_or_else(|| {
                    TransferError::usage(format!("Unknown environment: {:?}", value))
                })?
            }
            "debug" => {
                self.debug = matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
            }
            "encoding" => {
                self.defaults.encoding = Some(parse_encoding(&value)?)
            }
            _ => {
                self.defaults.extra.insert(key, Value::String(value));
            }
        }
        Ok(())
    }

    /// Whether public calls capture an error omen
    pub fn omens_enabled(&self) -> bool {
        self.environment != Environment::Production || self.debug
    }

    /// One read-only options snapshot for a single call
    pub fn merged(&self, more: &TransferOptions) -> TransferOptions {
        self.defaults.merge(more)
    }

    /// Absolute storage root for `options`.
    ///
    /// A relative `dirpath` resolves against `app_path`, and a relative
    /// `app_path` against the current working directory.
    pub fn resolve_dirpath(&self, options: &TransferOptions) -> PathBuf {
        let dirpath = Path::new(options.dirpath.as_deref().unwrap_or("./"));
        let joined = self.app_path.join(dirpath);
        std::path::absolute(&joined).unwrap_or(joined)
    }

    /// Startup check: production deployments must name their adapter.
    pub fn validate(&self) -> TransferResult<()> {
        if self.defaults.adapter.is_some() {
            return Ok(());
        }
        match self.environment {
            Environment::Production => Err(TransferError::usage(
                "In production, the transfer `adapter` must be set explicitly!",
            )),
            Environment::Staging => {
                warn!("No storage adapter was configured for file transfers.");
                warn!("Using the default, built-in disk adapter for uploads...");
                warn!("(But remember: in production, the `adapter` must be set explicitly!)");
                Ok(())
            }
            Environment::Development => Ok(()),
        }
    }
}
