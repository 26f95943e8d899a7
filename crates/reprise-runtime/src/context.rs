//! Suspended execution state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use reprise_ir::{ClassFile, Value};
use reprise_passes::{ProcedureDescriptor, ResumeIndex};

use crate::id::ContinuationId;

/// Field values of one procedure instance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcedureInstance {
    fields: BTreeMap<String, Value>,
}

impl ProcedureInstance {
    /// A fresh instance with every declared field at its initial value.
    pub fn new(class: &ClassFile) -> Self {
        Self {
            fields: class
                .fields
                .iter()
                .map(|field| (field.name.clone(), field.initial().to_value()))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Overwrite a declared field. Returns `false` if the field is unknown.
    pub fn set(&mut self, field: &str, value: Value) -> bool {
        match self.fields.get_mut(field) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// An independent copy.
    ///
    /// Values are immutable once built (strings and lists are shared
    /// read-only, cursors are copied with their position), so copying the
    /// field map yields a copy that no later mutation of either side can
    /// observe.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }
}

/// State recorded by a `checkpoint` instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub resume_point: ResumeIndex,
    pub locals: BTreeMap<u16, Value>,
    pub instance: ProcedureInstance,
}

/// Everything needed to re-enter a procedure at a resume point.
#[derive(Debug, Clone)]
pub struct ContinuationContext {
    pub id: ContinuationId,
    pub descriptor: Arc<ProcedureDescriptor>,
    pub resume_point: ResumeIndex,
    pub locals: BTreeMap<u16, Value>,
    pub instance: ProcedureInstance,
    /// Chain waiting for this one to answer.
    pub caller: Option<ContinuationId>,
    pub created: Instant,
    pub last_access: Instant,
}

impl ContinuationContext {
    /// Context for a chain that has not run yet.
    pub fn fresh(
        id: ContinuationId,
        descriptor: Arc<ProcedureDescriptor>,
        instance: ProcedureInstance,
        caller: Option<ContinuationId>,
        now: Instant,
    ) -> Self {
        Self {
            id,
            descriptor,
            resume_point: ResumeIndex::ENTRY,
            locals: BTreeMap::new(),
            instance,
            caller,
            created: now,
            last_access: now,
        }
    }
}
