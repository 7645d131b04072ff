use crate::workload::WorkloadProcessDetails;
use anyhow::Result;
use autoinst_common::constants::{OTEL_RESOURCE_ATTRIBUTES_ENV, OTEL_SERVICE_NAME_ENV};
use autoinst_common::OtelDistribution;
use autoinst_instrumentation::{ResourceAttribute, Settings, SettingsGetter};
use std::collections::HashSet;
use tracing::warn;

/// Pairs of an `OTEL_RESOURCE_ATTRIBUTES` value that could not be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed resource attribute pairs: {}", .malformed.join(", "))]
pub struct ResourceAttributesError {
    pub malformed: Vec<String>,
}

/// Parses `key1=value1,key2=value2`. Pairs without `=` or with an empty key or
/// value are skipped and collected into the error; the valid ones are still
/// returned.
pub fn parse_resource_attributes(
    value: &str,
) -> (Vec<ResourceAttribute>, Option<ResourceAttributesError>) {
    let mut attributes = Vec::new();
    let mut malformed = Vec::new();

    for pair in value.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
                attributes.push(ResourceAttribute::new(key.trim(), value.trim()));
            }
            _ => malformed.push(pair.to_string()),
        }
    }

    let err = (!malformed.is_empty()).then_some(ResourceAttributesError { malformed });
    (attributes, err)
}

/// Appends the attributes whose key is not already present.
fn append_unique(existing: &mut Vec<ResourceAttribute>, extra: Vec<ResourceAttribute>) {
    let mut keys: HashSet<String> = existing.iter().map(|attr| attr.key.clone()).collect();
    for attr in extra {
        if keys.insert(attr.key.clone()) {
            existing.push(attr);
        }
    }
}

pub fn resource_attributes(details: &WorkloadProcessDetails) -> Vec<ResourceAttribute> {
    let mut attributes = vec![
        ResourceAttribute::new("k8s.namespace.name", &details.namespace),
        ResourceAttribute::new("k8s.pod.name", &details.pod_name),
        ResourceAttribute::new("autoinst.workload.name", &details.workload_name),
    ];

    if let Some(container) = &details.container_name {
        attributes.push(ResourceAttribute::new("k8s.container.name", container));
    }

    if let Some(value) = details.env(OTEL_RESOURCE_ATTRIBUTES_ENV) {
        let (parsed, err) = parse_resource_attributes(value);
        if let Some(err) = err {
            warn!(pid = details.pid, error = %err, "Ignoring part of {}", OTEL_RESOURCE_ATTRIBUTES_ENV);
        }
        append_unique(&mut attributes, parsed);
    }

    let exec = &details.exec_details;
    let mut process = Vec::new();
    if !exec.exe_path.is_empty() {
        process.push(ResourceAttribute::new("process.executable.path", &exec.exe_path));
    }
    if let Some(command) = exec.cmd_line.split_whitespace().next() {
        process.push(ResourceAttribute::new("process.command", command));
    }
    process.push(ResourceAttribute::new("process.pid", details.pid.to_string()));
    if let Some(container_pid) = exec.container_process_id {
        process.push(ResourceAttribute::new("process.vpid", container_pid.to_string()));
    }
    append_unique(&mut attributes, process);

    attributes
}

pub struct EnvSettingsGetter;

#[async_trait::async_trait]
impl SettingsGetter<WorkloadProcessDetails> for EnvSettingsGetter {
    async fn settings(
        &self,
        details: &WorkloadProcessDetails,
        _distribution: &OtelDistribution,
    ) -> Result<Settings> {
        let service_name = details
            .env(OTEL_SERVICE_NAME_ENV)
            .filter(|name| !name.is_empty())
            .unwrap_or(&details.workload_name)
            .to_string();

        Ok(Settings {
            service_name,
            resource_attributes: resource_attributes(details),
            initial_config: None,
        })
    }
}
