// Node-graph workflow executed by an external engine

use super::{require_text, MediaKind, ValidationResult};
use crate::domain::{DomainError, JobKind};
use crate::port::Workload;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPayload {
    pub name: String,
    /// Node graph, keyed by node ID
    pub workflow: Value,
    #[serde(default = "empty_object")]
    pub inputs: Value,
}

pub struct WorkflowKind;

impl MediaKind for WorkflowKind {
    const KIND: JobKind = JobKind::Workflow;
    type Payload = WorkflowPayload;

    fn validate(p: &WorkflowPayload) -> ValidationResult {
        require_text("name", &p.name, 256)?;
        match p.workflow.as_object() {
            Some(nodes) if !nodes.is_empty() => {}
            _ => {
                return Err(DomainError::Validation(
                    "workflow must be a non-empty node graph".to_string(),
                ))
            }
        }
        if !p.inputs.is_object() {
            return Err(DomainError::Validation("inputs must be an object".to_string()));
        }
        Ok(())
    }

    fn workload(_p: &WorkflowPayload) -> Workload {
        Workload::default()
    }
}
