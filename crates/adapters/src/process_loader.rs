//! Process Loader
//!
//! Reads process specifications from YAML files at
//! `<plugins-dir>/*/*.{yml,yaml}`, validates each against the resource
//! limits and builds the registry. Any invalid spec is fatal to startup.

use std::path::{Path, PathBuf};

use sepex_core::{ProcessRegistry, ProcessSpec, ResourceLimits, ValidationError};
use tracing::info;

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("could not read plugins directory '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("could not parse process file '{file}': {source}")]
    Parse {
        file: String,
        source: serde_yaml::Error,
    },

    #[error("could not register process from '{file}': {source}")]
    Validation {
        file: String,
        source: ValidationError,
    },
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml") | Some("yaml")
    )
}

/// Collect `<dir>/*/*.{yml,yaml}`, sorted for a deterministic load order.
fn collect_spec_files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let read = |path: &Path| {
        std::fs::read_dir(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })
    };

    let mut files = Vec::new();
    for entry in read(dir)? {
        let entry = entry.map_err(|source| LoadError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        if !entry.path().is_dir() {
            continue;
        }
        for file in read(&entry.path())? {
            let file = file.map_err(|source| LoadError::Io {
                path: entry.path().display().to_string(),
                source,
            })?;
            let path = file.path();
            if path.is_file() && is_yaml(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Load and validate every process spec under the plugins directory.
pub fn load_processes(
    dir: &Path,
    limits: &ResourceLimits,
) -> Result<ProcessRegistry, LoadError> {
    let mut registry = ProcessRegistry::new();

    for path in collect_spec_files(dir)? {
        let file = path.display().to_string();
        let content = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
            path: file.clone(),
            source,
        })?;
        let spec: ProcessSpec = serde_yaml::from_str(&content).map_err(|source| {
            LoadError::Parse {
                file: file.clone(),
                source,
            }
        })?;
        spec.validate(limits).map_err(|source| LoadError::Validation {
            file: file.clone(),
            source,
        })?;
        info!(process_id = spec.id(), file, "registered process");
        registry.add(spec).map_err(|source| LoadError::Validation {
            file,
            source,
        })?;
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHO_SPEC: &str = r#"
info:
  id: echo
  title: Echo
  version: 1.0.0
  jobControlOptions: [sync-execute, async-execute]
  outputTransmission: [value]
host:
  type: subprocess
command: ["/bin/echo"]
config:
  maxResources:
    cpus: 0.1
    memory: 16
"#;

    fn limits() -> ResourceLimits {
        ResourceLimits {
            max_cpus: 4.0,
            max_memory_mb: 8192,
        }
    }

    #[test]
    fn loads_specs_from_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("echo");
        std::fs::create_dir(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("echo.yml"), ECHO_SPEC).unwrap();
        // Files directly under the plugins dir are ignored, as are non-YAML.
        std::fs::write(dir.path().join("stray.yml"), ECHO_SPEC).unwrap();
        std::fs::write(plugin_dir.join("README.md"), "docs").unwrap();

        let registry = load_processes(dir.path(), &limits()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
    }

    #[test]
    fn invalid_spec_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("bad");
        std::fs::create_dir(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("bad.yaml"),
            ECHO_SPEC.replace("cpus: 0.1", "cpus: 64.0"),
        )
        .unwrap();

        assert!(matches!(
            load_processes(dir.path(), &limits()),
            Err(LoadError::Validation { .. })
        ));
    }

    #[test]
    fn malformed_yaml_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("bad");
        std::fs::create_dir(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("bad.yml"), "info: [not a mapping").unwrap();

        assert!(matches!(
            load_processes(dir.path(), &limits()),
            Err(LoadError::Parse { .. })
        ));
    }

    #[test]
    fn duplicate_process_ids_across_files_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["one", "two"] {
            let plugin_dir = dir.path().join(name);
            std::fs::create_dir(&plugin_dir).unwrap();
            std::fs::write(plugin_dir.join("echo.yml"), ECHO_SPEC).unwrap();
        }

        assert!(matches!(
            load_processes(dir.path(), &limits()),
            Err(LoadError::Validation { .. })
        ));
    }

    #[test]
    fn missing_plugins_dir_is_an_error() {
        assert!(matches!(
            load_processes(Path::new("/nonexistent-plugins-dir"), &limits()),
            Err(LoadError::Io { .. })
        ));
    }
}
