// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Run configuration assembled from a base TOML file, a site TOML file and a
//! per-run JSON file, in that order of precedence.
//!
//! Every crate of the workspace owns its top-level table (`stepper`,
//! `spectral_conv`, `spectral_attention`, `preprocessor`, `visualization`)
//! through [`ConfigSection`]. Tables are merged key by key, so a run file
//! only has to name the fields it changes.

use ::tracing::debug;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

/// A top-level table of the run configuration with a typed view.
///
/// Absent tables resolve to `Default::default()`; every table read through
/// [`LayeredConfig::section`] is validated before it is handed out.
pub trait ConfigSection: DeserializeOwned + Default {
    const KEY: &'static str;

    type Invalid: Error + Send + Sync + 'static;

    fn validate(&self) -> Result<(), Self::Invalid>;
}

/// Paths of the three configuration files. Any of them may be left out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigFiles {
    pub base: Option<PathBuf>,
    pub site: Option<PathBuf>,
    pub run: Option<PathBuf>,
}

impl ConfigFiles {
    pub fn base(mut self, path: impl Into<PathBuf>) -> Self {
        self.base = Some(path.into());
        self
    }

    pub fn site(mut self, path: impl Into<PathBuf>) -> Self {
        self.site = Some(path.into());
        self
    }

    pub fn run(mut self, path: impl Into<PathBuf>) -> Self {
        self.run = Some(path.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LayeredConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse JSON {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path:?} must hold a table of sections")]
    NotATable { path: PathBuf },
    #[error("section [{section}] does not match its schema: {source}")]
    Schema {
        section: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("section [{section}] is invalid: {source}")]
    Invalid {
        section: &'static str,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

/// Merged view over the configuration files.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayeredConfig {
    sections: Map<String, Value>,
}

impl LayeredConfig {
    pub fn load(files: &ConfigFiles) -> Result<Self, LayeredConfigError> {
        let mut config = Self::default();
        if let Some(path) = &files.base {
            config.overlay(path, read_toml(path)?)?;
        }
        if let Some(path) = &files.site {
            config.overlay(path, read_toml(path)?)?;
        }
        if let Some(path) = &files.run {
            config.overlay(path, read_json(path)?)?;
        }
        Ok(config)
    }

    /// Wraps an already parsed document. Non-table documents yield an empty
    /// configuration.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(sections) => Self { sections },
            _ => Self::default(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sections.contains_key(key)
    }

    /// Deserializes and validates the table owned by `T`.
    pub fn section<T: ConfigSection>(&self) -> Result<T, LayeredConfigError> {
        let section = match self.sections.get(T::KEY) {
            Some(table) => serde_json::from_value::<T>(table.clone()).map_err(|source| {
                LayeredConfigError::Schema {
                    section: T::KEY,
                    source,
                }
            })?,
            None => T::default(),
        };
        section
            .validate()
            .map_err(|source| LayeredConfigError::Invalid {
                section: T::KEY,
                source: Box::new(source),
            })?;
        Ok(section)
    }

    fn overlay(&mut self, path: &Path, layer: Value) -> Result<(), LayeredConfigError> {
        let Value::Object(layer) = layer else {
            return Err(LayeredConfigError::NotATable {
                path: path.to_path_buf(),
            });
        };
        for (key, table) in layer {
            debug!(file = ?path, section = %key, "config section overlay");
            match self.sections.get_mut(&key) {
                Some(existing) => overlay_value(existing, table),
                None => {
                    self.sections.insert(key, table);
                }
            }
        }
        Ok(())
    }
}

/// Tables merge field by field; anything else replaces the earlier value.
fn overlay_value(dest: &mut Value, src: Value) {
    match (dest, src) {
        (Value::Object(dest), Value::Object(src)) => {
            for (key, value) in src {
                match dest.get_mut(&key) {
                    Some(slot) => overlay_value(slot, value),
                    None => {
                        dest.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn read(path: &Path) -> Result<String, LayeredConfigError> {
    fs::read_to_string(path).map_err(|source| LayeredConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_toml(path: &Path) -> Result<Value, LayeredConfigError> {
    toml::from_str::<Value>(&read(path)?).map_err(|source| LayeredConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json(path: &Path) -> Result<Value, LayeredConfigError> {
    serde_json::from_str(&read(path)?).map_err(|source| LayeredConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(default)]
    struct Rollout {
        n_future: usize,
        push_forward: bool,
        lead_hours: Vec<u32>,
        sampler: Sampler,
    }

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(default)]
    struct Sampler {
        shuffle: bool,
        workers: usize,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("n_future must not exceed 8")]
    struct TooLong;

    impl ConfigSection for Rollout {
        const KEY: &'static str = "rollout";
        type Invalid = TooLong;

        fn validate(&self) -> Result<(), TooLong> {
            if self.n_future > 8 {
                return Err(TooLong);
            }
            Ok(())
        }
    }

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn run_file_overrides_site_which_overrides_base() {
        let dir = tempfile::tempdir().unwrap();
        let files = ConfigFiles::default()
            .base(write(
                dir.path(),
                "base.toml",
                r#"
                [rollout]
                n_future = 2
                lead_hours = [6, 12]
                [rollout.sampler]
                shuffle = true
                workers = 2
                "#,
            ))
            .site(write(
                dir.path(),
                "site.toml",
                r#"
                [rollout]
                push_forward = true
                [rollout.sampler]
                workers = 16
                "#,
            ))
            .run(write(
                dir.path(),
                "run.json",
                r#"{"rollout": {"n_future": 4, "lead_hours": [24]}}"#,
            ));
        let config = LayeredConfig::load(&files).unwrap();
        assert!(config.contains("rollout"));
        assert_eq!(
            config.section::<Rollout>().unwrap(),
            Rollout {
                n_future: 4,
                push_forward: true,
                lead_hours: vec![24],
                sampler: Sampler {
                    shuffle: true,
                    workers: 16,
                },
            }
        );
    }

    #[test]
    fn absent_section_is_default_and_still_validated() {
        let config = LayeredConfig::from_value(serde_json::json!({"other": {"x": 1}}));
        assert!(!config.contains("rollout"));
        assert_eq!(config.section::<Rollout>().unwrap(), Rollout::default());
        assert_eq!(
            LayeredConfig::from_value(Value::Null).section::<Rollout>().unwrap(),
            Rollout::default()
        );
    }

    #[test]
    fn schema_and_validation_failures_name_the_section() {
        let config = LayeredConfig::from_value(serde_json::json!({"rollout": {"n_future": "two"}}));
        assert!(matches!(
            config.section::<Rollout>(),
            Err(LayeredConfigError::Schema { section: "rollout", .. })
        ));
        let config = LayeredConfig::from_value(serde_json::json!({"rollout": {"n_future": 12}}));
        let err = config.section::<Rollout>().unwrap_err();
        assert!(matches!(err, LayeredConfigError::Invalid { section: "rollout", .. }));
        assert!(err.to_string().contains("n_future must not exceed 8"));
    }

    #[test]
    fn unreadable_or_malformed_files_are_reported_with_their_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let err = LayeredConfig::load(&ConfigFiles::default().base(&missing)).unwrap_err();
        assert!(matches!(err, LayeredConfigError::Io { path, .. } if path == missing));

        let broken = write(dir.path(), "base.toml", "rollout = [");
        let err = LayeredConfig::load(&ConfigFiles::default().base(&broken)).unwrap_err();
        assert!(matches!(err, LayeredConfigError::Toml { .. }));

        let scalar = write(dir.path(), "run.json", "3");
        let err = LayeredConfig::load(&ConfigFiles::default().run(&scalar)).unwrap_err();
        assert!(matches!(err, LayeredConfigError::NotATable { .. }));
    }
}
