//! Artifact store for structured outputs that executors persist out-of-band.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::core::types::AgentError;
use crate::io::schema::{FieldError, OutputSchema};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid artifact key '{0}'")]
    InvalidKey(String),
    #[error("read artifact {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("artifact {path} is not valid json")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Map onto the agent taxonomy: a present-but-unparseable artifact is the
    /// executor's fault, anything else is infrastructure.
    pub fn into_agent_error(self) -> AgentError {
        let malformed = matches!(self, StoreError::Malformed { .. });
        let code = match &self {
            StoreError::InvalidKey(_) => "invalid_artifact_key",
            StoreError::Io { .. } => "store_read_failed",
            StoreError::Malformed { .. } => "malformed_artifact",
        };
        let message = format!("{:#}", anyhow::Error::new(self));
        if malformed {
            AgentError::execution(code, message)
        } else {
            AgentError::infra(code, message)
        }
    }
}

/// Keyed access to persisted artifacts.
pub trait ArtifactStore: Send + Sync {
    /// Location an executor should write `key` to.
    fn path(&self, key: &str) -> Result<PathBuf, StoreError>;

    /// `Ok(None)` when nothing was written under `key`.
    fn read_value(&self, key: &str) -> Result<Option<Value>, StoreError>;
}

/// Store rooted at a directory; keys are relative paths below it.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `value` under `key` (temp file + rename).
    pub fn write_value(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        let path = self.path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut buf = serde_json::to_string_pretty(value).context("serialize artifact")?;
        buf.push('\n');
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp artifact {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("replace artifact {}", path.display()))?;
        Ok(())
    }
}

impl ArtifactStore for FsArtifactStore {
    fn path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let valid = !key.trim().is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn read_value(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path(key)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "artifact missing");
                return Ok(None);
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        // An executor that created the file but never wrote to it counts as
        // not having produced the artifact.
        if contents.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| StoreError::Malformed { path, source })
    }
}

/// Result of looking up a structured artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactLoad<T> {
    Loaded(T),
    Missing,
    Invalid(Vec<FieldError>),
}

/// Read `key` and validate it against `schema`.
///
/// Only an I/O failure or present-but-unparseable JSON is an error; a missing
/// or schema-invalid artifact is reported so the caller can degrade.
pub fn load_artifact<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    key: &str,
    schema: &OutputSchema<T>,
) -> Result<ArtifactLoad<T>, StoreError> {
    let Some(value) = store.read_value(key)? else {
        return Ok(ArtifactLoad::Missing);
    };
    Ok(match schema.validate(&value) {
        Ok(output) => ArtifactLoad::Loaded(output),
        Err(errors) => ArtifactLoad::Invalid(errors),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ErrorKind;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Marker {
        name: String,
    }

    fn schema() -> OutputSchema<Marker> {
        OutputSchema::compile(
            r#"{"type":"object","required":["name"],"properties":{"name":{"type":"string"}}}"#,
        )
        .expect("compile")
    }

    #[test]
    fn rejects_keys_escaping_the_root() {
        let store = FsArtifactStore::new("/tmp/artifacts");
        for key in ["../outside.json", "/etc/passwd", "a/../../b", "", "./a.json"] {
            assert!(
                matches!(store.path(key), Err(StoreError::InvalidKey(_))),
                "{key} should be rejected"
            );
        }
        assert_eq!(
            store.path("research/corr-1.json").expect("path"),
            PathBuf::from("/tmp/artifacts/research/corr-1.json")
        );
    }

    #[test]
    fn missing_and_empty_artifacts_read_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(temp.path());
        assert_eq!(store.read_value("absent.json").expect("read"), None);

        fs::write(temp.path().join("empty.json"), "  \n").expect("write");
        assert_eq!(store.read_value("empty.json").expect("read"), None);
    }

    #[test]
    fn load_artifact_distinguishes_outcomes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(temp.path());
        let schema = schema();

        assert_eq!(
            load_artifact(&store, "a/out.json", &schema).expect("load"),
            ArtifactLoad::Missing
        );

        store
            .write_value("a/out.json", &json!({"name": "ok"}))
            .expect("write");
        assert_eq!(
            load_artifact(&store, "a/out.json", &schema).expect("load"),
            ArtifactLoad::Loaded(Marker {
                name: "ok".to_string()
            })
        );

        store
            .write_value("a/out.json", &json!({"name": 7}))
            .expect("write");
        assert!(matches!(
            load_artifact(&store, "a/out.json", &schema).expect("load"),
            ArtifactLoad::Invalid(errors) if errors.len() == 1
        ));
    }

    #[test]
    fn malformed_json_is_an_execution_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(temp.path());
        fs::write(temp.path().join("bad.json"), "{\"name\": ").expect("write");

        let err = load_artifact(&store, "bad.json", &schema()).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
        let agent_err = err.into_agent_error();
        assert_eq!(agent_err.kind, ErrorKind::Execution);
        assert_eq!(agent_err.code, "malformed_artifact");
        assert!(agent_err.message.contains("bad.json"));
    }

    #[test]
    fn invalid_key_is_infra() {
        let err = StoreError::InvalidKey("../x".to_string()).into_agent_error();
        assert_eq!(err.kind, ErrorKind::Infra);
        assert_eq!(err.code, "invalid_artifact_key");
    }
}
