//! On-disk TOML configuration.
//!
//! `./.trialcite.toml` is layered over `<config_dir>/trialcite/config.toml`;
//! every field is optional so partial files work.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Config, CoreError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub search: Option<SearchSection>,
    pub validation: Option<ValidationSection>,
    pub revalidation: Option<RevalidationSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSection {
    pub min_query_len: Option<usize>,
    pub context_chars: Option<usize>,
    pub fuzzy_threshold: Option<f64>,
    pub fuzzy_max_results: Option<usize>,
    pub fuzzy_context_items: Option<usize>,
    pub on_demand_max_pages: Option<usize>,
    pub on_demand_max_results: Option<usize>,
    pub spanning_window: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSection {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub request_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevalidationSection {
    pub change_threshold: Option<f64>,
    pub low_confidence_threshold: Option<f64>,
}

/// Platform config path: `<config_dir>/trialcite/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("trialcite").join("config.toml"))
}

/// Load the platform config with the CWD `.trialcite.toml` layered on top.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".trialcite.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load one config file. `None` if it is missing or unparseable.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config file");
            None
        }
    }
}

/// Field from `overlay` if set, else from `base`.
fn pick<S, T>(overlay: &Option<S>, base: &Option<S>, field: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs field by field; `overlay` wins.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (bs, os) = (&base.search, &overlay.search);
    let (bv, ov) = (&base.validation, &overlay.validation);
    let (br, or) = (&base.revalidation, &overlay.revalidation);

    ConfigFile {
        search: Some(SearchSection {
            min_query_len: pick(os, bs, |s| s.min_query_len),
            context_chars: pick(os, bs, |s| s.context_chars),
            fuzzy_threshold: pick(os, bs, |s| s.fuzzy_threshold),
            fuzzy_max_results: pick(os, bs, |s| s.fuzzy_max_results),
            fuzzy_context_items: pick(os, bs, |s| s.fuzzy_context_items),
            on_demand_max_pages: pick(os, bs, |s| s.on_demand_max_pages),
            on_demand_max_results: pick(os, bs, |s| s.on_demand_max_results),
            spanning_window: pick(os, bs, |s| s.spanning_window),
        }),
        validation: Some(ValidationSection {
            endpoint: pick(ov, bv, |v| v.endpoint.clone()),
            api_key: pick(ov, bv, |v| v.api_key.clone()),
            timeout_secs: pick(ov, bv, |v| v.timeout_secs),
            request_interval_ms: pick(ov, bv, |v| v.request_interval_ms),
        }),
        revalidation: Some(RevalidationSection {
            change_threshold: pick(or, br, |r| r.change_threshold),
            low_confidence_threshold: pick(or, br, |r| r.low_confidence_threshold),
        }),
    }
}

impl ConfigFile {
    /// Overwrite the fields of `config` that this file sets.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(ref s) = self.search {
            set(&mut config.min_query_len, s.min_query_len);
            set(&mut config.context_chars, s.context_chars);
            set(&mut config.fuzzy_threshold, s.fuzzy_threshold);
            set(&mut config.fuzzy_max_results, s.fuzzy_max_results);
            set(&mut config.fuzzy_context_items, s.fuzzy_context_items);
            set(&mut config.on_demand_max_pages, s.on_demand_max_pages);
            set(&mut config.on_demand_max_results, s.on_demand_max_results);
            set(&mut config.spanning_window, s.spanning_window);
        }
        if let Some(ref v) = self.validation {
            if v.endpoint.is_some() {
                config.validation_endpoint = v.endpoint.clone();
            }
            if v.api_key.is_some() {
                config.validation_api_key = v.api_key.clone();
            }
            set(&mut config.validation_timeout_secs, v.timeout_secs);
            set(&mut config.request_interval_ms, v.request_interval_ms);
        }
        if let Some(ref r) = self.revalidation {
            set(&mut config.change_threshold, r.change_threshold);
            set(&mut config.low_confidence_threshold, r.low_confidence_threshold);
        }
    }

    /// Defaults with this file applied.
    pub fn to_config(&self) -> Config {
        let mut config = Config::default();
        self.apply_to(&mut config);
        config
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

/// Save to the platform config directory, returning the path written.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, CoreError> {
    let path = config_path().ok_or(CoreError::NoConfigDir)?;
    save_to_path(config, &path)?;
    Ok(path)
}

pub fn save_to_path(config: &ConfigFile, path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses() {
        let parsed: ConfigFile =
            toml::from_str("[validation]\nendpoint = \"http://localhost:8080/validate\"\n").unwrap();
        let v = parsed.validation.unwrap();
        assert_eq!(v.endpoint.as_deref(), Some("http://localhost:8080/validate"));
        assert!(v.api_key.is_none());
        assert!(parsed.search.is_none());
    }

    #[test]
    fn merge_overlay_wins() {
        let base = ConfigFile {
            search: Some(SearchSection {
                fuzzy_threshold: Some(0.8),
                context_chars: Some(50),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            search: Some(SearchSection {
                fuzzy_threshold: Some(0.75),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay);
        let s = merged.search.unwrap();
        assert_eq!(s.fuzzy_threshold, Some(0.75));
        assert_eq!(s.context_chars, Some(50));
    }

    #[test]
    fn merge_keeps_base_when_overlay_empty() {
        let base = ConfigFile {
            revalidation: Some(RevalidationSection {
                change_threshold: Some(0.1),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, ConfigFile::default());
        assert_eq!(merged.revalidation.unwrap().change_threshold, Some(0.1));
    }

    #[test]
    fn apply_only_overrides_set_fields() {
        let file = ConfigFile {
            validation: Some(ValidationSection {
                request_interval_ms: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = file.to_config();
        assert_eq!(config.request_interval_ms, 0);
        assert_eq!(config.validation_timeout_secs, 30);
        assert_eq!(config.fuzzy_threshold, 0.7);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trialcite").join("config.toml");
        let file = ConfigFile {
            validation: Some(ValidationSection {
                endpoint: Some("https://validator.example/api".into()),
                timeout_secs: Some(10),
                ..Default::default()
            }),
            ..Default::default()
        };
        save_to_path(&file, &path).unwrap();
        assert_eq!(load_from_path(&path), Some(file));
    }

    #[test]
    fn invalid_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "search = [").unwrap();
        assert!(load_from_path(&path).is_none());
    }
}
