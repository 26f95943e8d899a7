//! Runtime values and their semantic slot types.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Semantic type of a local slot or operand.
///
/// Restoration must use type-correct load/store operations, so every captured
/// slot is classified into one of these families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    /// 32-bit integer family (also used for booleans).
    Int,
    /// 64-bit integer.
    Long,
    /// 64-bit float.
    Double,
    /// Any reference: null, strings, lists, cursors.
    Ref,
}

impl SlotType {
    pub fn is_numeric(self) -> bool {
        !matches!(self, SlotType::Ref)
    }

    /// Wide values occupy two slots on the JVM; here they only matter for
    /// classification.
    pub fn is_wide(self) -> bool {
        matches!(self, SlotType::Long | SlotType::Double)
    }
}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotType::Int => "int",
            SlotType::Long => "long",
            SlotType::Double => "double",
            SlotType::Ref => "ref",
        };
        f.write_str(name)
    }
}

/// Iterator position over an immutable list.
///
/// Cursors have value semantics: copying a cursor copies its position, so a
/// captured cursor resumes exactly where it stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    items: Arc<[Value]>,
    pos: usize,
}

impl Cursor {
    pub fn new(items: Arc<[Value]>) -> Self {
        Self { items, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.items.len().saturating_sub(self.pos)
    }

    /// Yields the next item and advances the cursor.
    pub fn advance(&mut self) -> Option<Value> {
        let item = self.items.get(self.pos)?.clone();
        self.pos += 1;
        Some(item)
    }
}

/// A value held in a local slot, on the operand stack, or in an instance field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    Double(f64),
    Str(Arc<str>),
    List(Arc<[Value]>),
    Cursor(Cursor),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn slot_type(&self) -> SlotType {
        match self {
            Value::Int(_) => SlotType::Int,
            Value::Long(_) => SlotType::Long,
            Value::Double(_) => SlotType::Double,
            Value::Null | Value::Str(_) | Value::List(_) | Value::Cursor(_) => SlotType::Ref,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Cursor(c) => write!(f, "<cursor {}/{}>", c.pos, c.items.len()),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

/// The serializable subset of [`Value`] that may appear in class files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constant {
    Null,
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
}

impl Constant {
    pub fn slot_type(&self) -> SlotType {
        match self {
            Constant::Int(_) => SlotType::Int,
            Constant::Long(_) => SlotType::Long,
            Constant::Double(_) => SlotType::Double,
            Constant::Null | Constant::Str(_) => SlotType::Ref,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Constant::Null => Value::Null,
            Constant::Int(v) => Value::Int(*v),
            Constant::Long(v) => Value::Long(*v),
            Constant::Double(v) => Value::Double(*v),
            Constant::Str(s) => Value::str(s),
        }
    }

    /// Zero value for a slot type, used for field defaults.
    pub fn zero(ty: SlotType) -> Self {
        match ty {
            SlotType::Int => Constant::Int(0),
            SlotType::Long => Constant::Long(0),
            SlotType::Double => Constant::Double(0.0),
            SlotType::Ref => Constant::Null,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => f.write_str("null"),
            Constant::Int(v) => write!(f, "{v}"),
            Constant::Long(v) => write!(f, "{v}L"),
            Constant::Double(v) => write!(f, "{v:?}"),
            Constant::Str(s) => write!(f, "{s:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_copies_keep_position() {
        let items: Arc<[Value]> = vec![Value::Int(1), Value::Int(2), Value::Int(3)].into();
        let mut cursor = Cursor::new(items);
        assert_eq!(cursor.advance(), Some(Value::Int(1)));

        let mut copy = cursor.clone();
        assert_eq!(copy.advance(), Some(Value::Int(2)));
        assert_eq!(copy.advance(), Some(Value::Int(3)));
        assert_eq!(copy.advance(), None);

        // The original is unaffected by the copy advancing.
        assert_eq!(cursor.position(), 1);
        assert_eq!(cursor.advance(), Some(Value::Int(2)));
    }

    #[test]
    fn reference_values_share_slot_type() {
        assert_eq!(Value::Null.slot_type(), SlotType::Ref);
        assert_eq!(Value::str("x").slot_type(), SlotType::Ref);
        assert_eq!(Value::List(Arc::from(Vec::new())).slot_type(), SlotType::Ref);
        assert_eq!(Value::Long(3).slot_type(), SlotType::Long);
    }

    #[test]
    fn list_display() {
        let list = Value::List(vec![Value::Int(1), Value::str("a"), Value::Null].into());
        assert_eq!(list.to_string(), "[1, a, null]");
    }
}
