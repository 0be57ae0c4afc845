//! YAML loader resolving `!include`, `!secret` and `!env_var`

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use tracing::{debug, trace, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;

/// YAML loader with custom tag support
pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being loaded, outermost first
    include_stack: Vec<PathBuf>,
}

impl YamlLoader {
    /// Create a loader for a config directory, reading its secrets file
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self::with_secrets(config_dir, secrets))
    }

    /// Create a loader with a pre-built secrets store
    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            include_stack: Vec::new(),
        }
    }

    /// Load a file, relative paths resolving against the config directory
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = match path.as_ref() {
            p if p.is_absolute() => p.to_path_buf(),
            p => self.config_dir.join(p),
        };

        if self.include_stack.contains(&path) {
            let chain = self
                .include_stack
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(ConfigError::CircularInclude { path, chain });
        }

        debug!(path = %path.display(), "Loading YAML file");
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;

        self.include_stack.push(path.clone());
        let result = self.load_str(&content, &path);
        self.include_stack.pop();
        result
    }

    /// Parse and resolve YAML text. `origin` anchors relative includes.
    pub fn load_str(&mut self, content: &str, origin: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
            path: origin.to_path_buf(),
            source,
        })?;
        self.resolve(value, origin)
    }

    fn resolve(&mut self, value: Value, origin: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.resolve_tag(*tagged, origin),
            Value::Mapping(map) => {
                let mut resolved = Mapping::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(self.resolve(key, origin)?, self.resolve(value, origin)?);
                }
                Ok(Value::Mapping(resolved))
            }
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.resolve(item, origin))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            scalar => Ok(scalar),
        }
    }

    fn resolve_tag(&mut self, tagged: TaggedValue, origin: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(tag = %tag, "Resolving tag");

        match tag.as_str() {
            "!include" => {
                let target = include_target(&tagged.value, origin, &self.config_dir)?;
                self.load_file(target)
            }
            "!secret" => {
                let key = tag_argument(&tagged.value, "!secret")?;
                let secret = self.secrets.get(key)?;
                debug!(key = %key, "Substituted secret");
                Ok(Value::String(secret.to_string()))
            }
            "!env_var" => {
                let var = tag_argument(&tagged.value, "!env_var")?;
                let value = std::env::var(var).map_err(|_| ConfigError::EnvVarNotFound {
                    var: var.to_string(),
                })?;
                debug!(var = %var, "Substituted environment variable");
                Ok(Value::String(value))
            }
            _ => {
                warn!(tag = %tag, "Unknown YAML tag left in place");
                let inner = self.resolve(tagged.value, origin)?;
                Ok(Value::Tagged(Box::new(TaggedValue {
                    tag: tagged.tag,
                    value: inner,
                })))
            }
        }
    }

    pub fn secrets(&self) -> &Secrets {
        &self.secrets
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

fn tag_argument<'a>(value: &'a Value, tag: &str) -> ConfigResult<&'a str> {
    value.as_str().ok_or_else(|| ConfigError::InvalidValue {
        key: tag.to_string(),
        reason: "argument must be a string".to_string(),
    })
}

fn include_target(value: &Value, origin: &Path, config_dir: &Path) -> ConfigResult<PathBuf> {
    let raw = value.as_str().ok_or_else(|| ConfigError::InvalidIncludePath {
        path: format!("{value:?}"),
        reason: "path must be a string".to_string(),
    })?;
    if raw.is_empty() {
        return Err(ConfigError::InvalidIncludePath {
            path: raw.to_string(),
            reason: "path is empty".to_string(),
        });
    }

    let target = Path::new(raw);
    if target.is_absolute() {
        return Ok(target.to_path_buf());
    }
    let base = origin.parent().unwrap_or(config_dir);
    Ok(base.join(target))
}

/// Load a file from a config directory with full tag resolution
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_file(file)
}
