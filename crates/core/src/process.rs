//! Process specifications
//!
//! A process is a declarative description of a runnable unit (container
//! image, subprocess invocation or remote batch definition) registered at
//! startup. Specifications are immutable after validation; every execution
//! request is checked against them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ValidationError};
use crate::job::{HostKind, ResourceLimits, Resources};

/// Upper-cased `<id>_` prefix every configured env variable must carry.
pub fn env_var_prefix(process_id: &str) -> String {
    format!("{}_", process_id.to_uppercase())
}

/// Execution modes a process admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobControlOption {
    #[serde(rename = "sync-execute")]
    SyncExecute,
    #[serde(rename = "async-execute")]
    AsyncExecute,
}

/// How outputs are handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransmissionMode {
    Reference,
    Value,
}

/// Descriptive block of a process specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: String,
    pub title: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "jobControlOptions")]
    pub job_control_options: Vec<JobControlOption>,
    #[serde(default, rename = "outputTransmission")]
    pub output_transmission: Vec<TransmissionMode>,
}

/// Execution host block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSpec {
    #[serde(rename = "type")]
    pub kind: HostKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(
        default,
        rename = "jobDefinition",
        skip_serializing_if = "Option::is_none"
    )]
    pub job_definition: Option<String>,
    #[serde(default, rename = "jobQueue", skip_serializing_if = "Option::is_none")]
    pub job_queue: Option<String>,
}

/// Runtime configuration block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessConfig {
    #[serde(default, rename = "envVars")]
    pub env_vars: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default, rename = "maxResources")]
    pub max_resources: Resources,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueDefinition {
    #[serde(default, rename = "anyValue")]
    pub any_value: bool,
    #[serde(default, rename = "possibleValues")]
    pub possible_values: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiteralDataDomain {
    #[serde(default, rename = "dataType")]
    pub data_type: String,
    #[serde(default, rename = "valueDefinition")]
    pub value_definition: ValueDefinition,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputDef {
    #[serde(default, rename = "literalDataDomain")]
    pub literal_data_domain: LiteralDataDomain,
}

/// One declared process input with its occurrence bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input: InputDef,
    #[serde(default, rename = "minOccurs")]
    pub min_occurs: u32,
    /// `None` means unbounded.
    #[serde(default, rename = "maxOccurs", skip_serializing_if = "Option::is_none")]
    pub max_occurs: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputDef {
    #[serde(default, rename = "transmissionMode")]
    pub transmission_mode: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub output: OutputDef,
}

/// A validated process specification, immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub info: ProcessInfo,
    pub host: HostSpec,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub config: ProcessConfig,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
}

impl ProcessSpec {
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn kind(&self) -> HostKind {
        self.host.kind
    }

    pub fn allows(&self, option: JobControlOption) -> bool {
        self.info.job_control_options.contains(&option)
    }

    /// Check the specification against structural rules and the host-wide
    /// resource limits. Failures are fatal to startup.
    pub fn validate(&self, limits: &ResourceLimits) -> Result<()> {
        let id = &self.info.id;
        if id.is_empty() || *id != id.to_lowercase() {
            return Err(ValidationError::InvalidProcessId(id.clone()));
        }
        if self.info.title.is_empty() {
            return Err(ValidationError::MissingField {
                id: id.clone(),
                field: "title",
            });
        }
        if self.info.version.is_empty() {
            return Err(ValidationError::MissingField {
                id: id.clone(),
                field: "version",
            });
        }

        match self.host.kind {
            HostKind::Container => {
                if self.host.image.as_deref().unwrap_or("").is_empty() {
                    return Err(ValidationError::MissingImage { id: id.clone() });
                }
            }
            HostKind::RemoteBatch => {
                if self.host.job_definition.as_deref().unwrap_or("").is_empty()
                    || self.host.job_queue.as_deref().unwrap_or("").is_empty()
                {
                    return Err(ValidationError::MissingBatchTarget { id: id.clone() });
                }
            }
            HostKind::Subprocess => {
                if self.command.is_empty() {
                    return Err(ValidationError::MissingCommand { id: id.clone() });
                }
            }
        }

        if self.host.kind.is_local() {
            let requested = self.config.max_resources;
            if requested.cpus > limits.max_cpus {
                return Err(ValidationError::ResourcesOverLimit {
                    id: id.clone(),
                    what: "cpus",
                    requested: requested.cpus,
                    limit: limits.max_cpus,
                });
            }
            if requested.memory_mb > limits.max_memory_mb {
                return Err(ValidationError::ResourcesOverLimit {
                    id: id.clone(),
                    what: "memory MB",
                    requested: requested.memory_mb as f64,
                    limit: limits.max_memory_mb as f64,
                });
            }
        }

        if !self.config.volumes.is_empty() && self.host.kind != HostKind::Container {
            return Err(ValidationError::VolumesNotSupported { id: id.clone() });
        }
        for spec in &self.config.volumes {
            let parts: Vec<&str> = spec.split(':').collect();
            if parts.len() != 2 || parts[0].trim().is_empty() || parts[1].trim().is_empty() {
                return Err(ValidationError::InvalidVolume {
                    id: id.clone(),
                    spec: spec.clone(),
                });
            }
        }

        self.verify_local_env_vars()?;

        for (index, input) in self.inputs.iter().enumerate() {
            if input.id.is_empty() {
                return Err(ValidationError::InputMissingId {
                    id: id.clone(),
                    index,
                });
            }
        }
        for (index, output) in self.outputs.iter().enumerate() {
            if output.id.is_empty() {
                return Err(ValidationError::OutputMissingId {
                    id: id.clone(),
                    index,
                });
            }
        }

        Ok(())
    }

    /// Every configured env var name must start with `UPPER(id)_` and have a
    /// non-empty value in the host environment at registration time.
    pub fn verify_local_env_vars(&self) -> Result<()> {
        let prefix = env_var_prefix(&self.info.id);
        let mut missing = Vec::new();
        for var in &self.config.env_vars {
            if !var.starts_with(&prefix) {
                return Err(ValidationError::EnvVarPrefix {
                    id: self.info.id.clone(),
                    var: var.clone(),
                    prefix,
                });
            }
            if std::env::var(var).unwrap_or_default().is_empty() {
                missing.push(var.clone());
            }
        }
        if !missing.is_empty() {
            return Err(ValidationError::EnvVarsMissing {
                id: self.info.id.clone(),
                vars: missing,
            });
        }
        Ok(())
    }

    /// Validate request inputs against the declared occurrence bounds.
    ///
    /// An input arriving as a JSON array contributes `len` occurrences,
    /// anything else contributes one. Unknown input ids are rejected.
    pub fn verify_inputs(&self, inputs: &serde_json::Map<String, Value>) -> Result<()> {
        let mut occurrences: HashMap<&str, u32> = HashMap::new();
        for input in &self.inputs {
            occurrences.insert(input.id.as_str(), 0);
        }

        for (key, value) in inputs {
            let Some(count) = occurrences.get_mut(key.as_str()) else {
                return Err(ValidationError::UnknownInput {
                    id: self.info.id.clone(),
                    input: key.clone(),
                });
            };
            *count = match value {
                Value::Array(seq) => seq.len() as u32,
                _ => 1,
            };
        }

        for input in &self.inputs {
            let occur = occurrences[input.id.as_str()];
            let over = input.max_occurs.is_some_and(|max| occur > max);
            if over || occur < input.min_occurs {
                return Err(ValidationError::InputOccurrence(input.id.clone()));
            }
        }

        Ok(())
    }

    /// Resolve the configured env vars into `(name, value)` pairs for the
    /// child, stripping the `UPPER(id)_` prefix from each name.
    pub fn resolve_env_vars(&self) -> Vec<(String, String)> {
        let prefix = env_var_prefix(&self.info.id);
        self.config
            .env_vars
            .iter()
            .map(|var| {
                let name = var.strip_prefix(&prefix).unwrap_or(var).to_string();
                (name, std::env::var(var).unwrap_or_default())
            })
            .collect()
    }

    /// OGC process description view.
    pub fn describe(&self) -> ProcessDescription {
        ProcessDescription {
            info: self.info.clone(),
            command: self.command.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

/// Process description document returned by `GET /processes/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessDescription {
    #[serde(flatten)]
    pub info: ProcessInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
}

/// Ordered collection of validated process specifications.
///
/// Kept as a vector rather than a map so listings preserve load order.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    list: Vec<ProcessSpec>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a spec, rejecting duplicate ids.
    pub fn add(&mut self, spec: ProcessSpec) -> Result<()> {
        if self.get(spec.id()).is_some() {
            return Err(ValidationError::DuplicateProcessId {
                id: spec.id().to_string(),
            });
        }
        self.list.push(spec);
        Ok(())
    }

    pub fn get(&self, process_id: &str) -> Option<&ProcessSpec> {
        self.list.iter().find(|p| p.info.id == process_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessSpec> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn summaries(&self) -> Vec<ProcessInfo> {
        self.list.iter().map(|p| p.info.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> ResourceLimits {
        ResourceLimits {
            max_cpus: 4.0,
            max_memory_mb: 8192,
        }
    }

    fn subprocess_spec(id: &str) -> ProcessSpec {
        ProcessSpec {
            info: ProcessInfo {
                id: id.to_string(),
                title: "Echo".to_string(),
                version: "1.0.0".to_string(),
                description: String::new(),
                job_control_options: vec![
                    JobControlOption::SyncExecute,
                    JobControlOption::AsyncExecute,
                ],
                output_transmission: vec![TransmissionMode::Value],
            },
            host: HostSpec {
                kind: HostKind::Subprocess,
                image: None,
                job_definition: None,
                job_queue: None,
            },
            command: vec!["/bin/echo".to_string()],
            config: ProcessConfig {
                env_vars: vec![],
                volumes: vec![],
                max_resources: Resources::new(0.5, 128),
            },
            inputs: vec![],
            outputs: vec![],
        }
    }

    #[test]
    fn valid_subprocess_spec_passes() {
        assert!(subprocess_spec("echo").validate(&limits()).is_ok());
    }

    #[test]
    fn uppercase_process_id_rejected() {
        let spec = subprocess_spec("Echo");
        assert!(matches!(
            spec.validate(&limits()),
            Err(ValidationError::InvalidProcessId(_))
        ));
    }

    #[test]
    fn container_requires_image() {
        let mut spec = subprocess_spec("runner");
        spec.host.kind = HostKind::Container;
        assert!(matches!(
            spec.validate(&limits()),
            Err(ValidationError::MissingImage { .. })
        ));

        spec.host.image = Some("alpine:3".to_string());
        assert!(spec.validate(&limits()).is_ok());
    }

    #[test]
    fn remote_batch_requires_definition_and_queue() {
        let mut spec = subprocess_spec("batcher");
        spec.host.kind = HostKind::RemoteBatch;
        assert!(matches!(
            spec.validate(&limits()),
            Err(ValidationError::MissingBatchTarget { .. })
        ));

        spec.host.job_definition = Some("batcher-def:4".to_string());
        spec.host.job_queue = Some("default-queue".to_string());
        assert!(spec.validate(&limits()).is_ok());
    }

    #[test]
    fn resources_over_limits_rejected() {
        let mut spec = subprocess_spec("hungry");
        spec.config.max_resources = Resources::new(64.0, 128);
        assert!(matches!(
            spec.validate(&limits()),
            Err(ValidationError::ResourcesOverLimit { what: "cpus", .. })
        ));

        spec.config.max_resources = Resources::new(0.5, 1 << 20);
        assert!(matches!(
            spec.validate(&limits()),
            Err(ValidationError::ResourcesOverLimit { .. })
        ));
    }

    #[test]
    fn remote_batch_ignores_local_limits() {
        let mut spec = subprocess_spec("bigbatch");
        spec.host.kind = HostKind::RemoteBatch;
        spec.host.job_definition = Some("def".to_string());
        spec.host.job_queue = Some("queue".to_string());
        spec.config.max_resources = Resources::new(256.0, 1 << 20);
        assert!(spec.validate(&limits()).is_ok());
    }

    #[test]
    fn env_var_without_prefix_rejected() {
        let mut spec = subprocess_spec("echo");
        spec.config.env_vars = vec!["OTHER_TOKEN".to_string()];
        assert!(matches!(
            spec.validate(&limits()),
            Err(ValidationError::EnvVarPrefix { .. })
        ));
    }

    #[test]
    fn env_var_missing_from_host_rejected() {
        let mut spec = subprocess_spec("echo");
        spec.config.env_vars = vec!["ECHO_UNSET_FOR_TEST_XYZ".to_string()];
        assert!(matches!(
            spec.validate(&limits()),
            Err(ValidationError::EnvVarsMissing { .. })
        ));
    }

    #[test]
    fn env_var_prefix_stripped_on_resolve() {
        std::env::set_var("ECHO_GREETING_TOKEN", "hola");
        let mut spec = subprocess_spec("echo");
        spec.config.env_vars = vec!["ECHO_GREETING_TOKEN".to_string()];
        assert!(spec.validate(&limits()).is_ok());

        let resolved = spec.resolve_env_vars();
        assert_eq!(
            resolved,
            vec![("GREETING_TOKEN".to_string(), "hola".to_string())]
        );
        std::env::remove_var("ECHO_GREETING_TOKEN");
    }

    #[test]
    fn volumes_only_for_containers() {
        let mut spec = subprocess_spec("echo");
        spec.config.volumes = vec!["/data:/data".to_string()];
        assert!(matches!(
            spec.validate(&limits()),
            Err(ValidationError::VolumesNotSupported { .. })
        ));
    }

    #[test]
    fn malformed_volume_rejected() {
        let mut spec = subprocess_spec("runner");
        spec.host.kind = HostKind::Container;
        spec.host.image = Some("alpine:3".to_string());
        spec.config.volumes = vec!["/data".to_string()];
        assert!(matches!(
            spec.validate(&limits()),
            Err(ValidationError::InvalidVolume { .. })
        ));
    }

    fn spec_with_inputs() -> ProcessSpec {
        let mut spec = subprocess_spec("echo");
        spec.inputs = vec![
            InputSpec {
                id: "text".to_string(),
                title: String::new(),
                description: String::new(),
                input: InputDef::default(),
                min_occurs: 1,
                max_occurs: Some(1),
            },
            InputSpec {
                id: "flags".to_string(),
                title: String::new(),
                description: String::new(),
                input: InputDef::default(),
                min_occurs: 0,
                max_occurs: Some(3),
            },
        ];
        spec
    }

    #[test]
    fn verify_inputs_accepts_valid_request() {
        let spec = spec_with_inputs();
        let body = json!({"text": "hello", "flags": ["-a", "-b"]});
        let map = body.as_object().unwrap();
        assert!(spec.verify_inputs(map).is_ok());
    }

    #[test]
    fn verify_inputs_counts_array_occurrences() {
        let spec = spec_with_inputs();
        let body = json!({"text": "hello", "flags": ["-a", "-b", "-c", "-d"]});
        assert!(matches!(
            spec.verify_inputs(body.as_object().unwrap()),
            Err(ValidationError::InputOccurrence(ref id)) if id == "flags"
        ));
    }

    #[test]
    fn verify_inputs_enforces_min_occurs() {
        let spec = spec_with_inputs();
        let body = json!({});
        assert!(matches!(
            spec.verify_inputs(body.as_object().unwrap()),
            Err(ValidationError::InputOccurrence(ref id)) if id == "text"
        ));
    }

    #[test]
    fn verify_inputs_rejects_unknown_keys() {
        let spec = spec_with_inputs();
        let body = json!({"text": "hello", "bogus": 1});
        assert!(matches!(
            spec.verify_inputs(body.as_object().unwrap()),
            Err(ValidationError::UnknownInput { .. })
        ));
    }

    #[test]
    fn registry_rejects_duplicate_ids() {
        let mut registry = ProcessRegistry::new();
        registry.add(subprocess_spec("echo")).unwrap();
        assert!(matches!(
            registry.add(subprocess_spec("echo")),
            Err(ValidationError::DuplicateProcessId { .. })
        ));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = r#"
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
    cpus: 0.5
    memory: 128
inputs:
  - id: text
    minOccurs: 1
    maxOccurs: 1
"#;
        let spec: ProcessSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.id(), "echo");
        assert_eq!(spec.kind(), HostKind::Subprocess);
        assert_eq!(spec.config.max_resources.memory_mb, 128);
        assert!(spec.allows(JobControlOption::SyncExecute));
        assert!(spec.validate(&limits()).is_ok());
    }
}
