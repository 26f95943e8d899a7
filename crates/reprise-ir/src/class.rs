//! Procedure classes and their byte encoding.
//!
//! Class bytes are the JSON encoding of [`ClassFile`]. The engine only ever
//! consumes bytes produced elsewhere and emits transformed bytes; it never
//! compiles source.

use std::fmt;

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::instr::Instr;
use crate::value::{Constant, SlotType};

/// Method that request handling enters when none is named.
pub const DEFAULT_METHOD: &str = "process";

/// A declared instance field of a procedure class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: SlotType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<Constant>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: SlotType) -> Self {
        Self {
            name: name.into(),
            ty,
            init: None,
        }
    }

    pub fn with_init(mut self, init: Constant) -> Self {
        self.init = Some(init);
        self
    }

    /// Initial value for a fresh instance.
    pub fn initial(&self) -> Constant {
        self.init.clone().unwrap_or_else(|| Constant::zero(self.ty))
    }
}

/// A protected range `[start, end)` whose faults transfer to `handler`.
///
/// The handler starts with the fault message (a `ref`) as the only operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TryRegion {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
}

impl TryRegion {
    pub fn covers(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub max_locals: u16,
    pub code: Vec<Instr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub try_regions: Vec<TryRegion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDef>,
    /// Instances of this class can be deep-copied into independent chains.
    #[serde(default)]
    pub cloneable: bool,
    /// Set on classes emitted by the transformer.
    #[serde(default)]
    pub instrumented: bool,
    pub methods: Vec<MethodDef>,
}

impl ClassFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            cloneable: false,
            instrumented: false,
            methods: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    pub fn cloneable(mut self, cloneable: bool) -> Self {
        self.cloneable = cloneable;
        self
    }

    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn method_mut(&mut self, name: &str) -> Option<&mut MethodDef> {
        self.methods.iter_mut().find(|m| m.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Decode class bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError {
            message: e.to_string(),
        })
    }

    /// Encode to class bytes.
    pub fn encode(&self) -> Vec<u8> {
        // Serializing plain data with string keys cannot fail.
        serde_json::to_vec_pretty(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("invalid class bytes: {message}")]
pub struct DecodeError {
    pub message: String,
}

/// Stable content hash of class bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// Identity of a resumable unit: class plus method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcedureId {
    pub class: String,
    pub method: String,
}

impl ProcedureId {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ClassFile {
        ClassFile::new("Counter")
            .with_field(FieldDef::new("hits", SlotType::Int))
            .with_method(MethodDef {
                name: DEFAULT_METHOD.to_owned(),
                max_locals: 1,
                code: vec![Instr::Pause, Instr::Return],
                try_regions: Vec::new(),
            })
    }

    #[test]
    fn decode_encoded_class() {
        let class = sample();
        let decoded = ClassFile::decode(&class.encode()).unwrap();
        assert_eq!(decoded, class);
        assert!(decoded.method("process").is_some());
        assert_eq!(decoded.field("hits").unwrap().initial(), Constant::Int(0));
    }

    #[test]
    fn decode_reports_garbage() {
        let err = ClassFile::decode(b"not json").unwrap_err();
        assert!(err.to_string().starts_with("invalid class bytes"));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = sample().encode();
        let mut changed = sample();
        changed.cloneable = true;
        let b = changed.encode();

        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&a));
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
        assert_eq!(Fingerprint::of(&a).to_string().len(), 16);
    }
}
