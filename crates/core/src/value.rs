//! Dynamically typed values passed as signal parameters and return values

use crate::types::{Object, Type};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A typed value container
#[derive(Clone, Default)]
pub enum Value {
    /// No value. Also stands for a null object or pointer.
    #[default]
    None,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Object(Object),
    Pointer(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// The runtime type of the held value
    pub fn value_type(&self) -> Type {
        match self {
            Value::None => Type::NONE,
            Value::Bool(_) => Type::BOOL,
            Value::Int(_) => Type::INT,
            Value::UInt(_) => Type::UINT,
            Value::Double(_) => Type::DOUBLE,
            Value::String(_) => Type::STRING,
            Value::Object(object) => object.type_(),
            Value::Pointer(_) => Type::POINTER,
        }
    }

    /// The zero value a return slot of type `ty` starts out with
    pub fn default_for(ty: Type) -> Value {
        match ty {
            Type::BOOL => Value::Bool(false),
            Type::INT => Value::Int(0),
            Type::UINT => Value::UInt(0),
            Type::DOUBLE => Value::Double(0.0),
            Type::STRING => Value::String(String::new()),
            _ => Value::None,
        }
    }

    /// Whether this value may be stored in a slot of type `ty`
    pub fn holds(&self, ty: Type) -> bool {
        match self {
            Value::None => ty == Type::NONE || ty == Type::POINTER || ty.is_a(Type::OBJECT),
            Value::Object(object) => object.type_().is_a(ty),
            other => other.value_type() == ty,
        }
    }

    pub fn get_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_uint(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_object(&self) -> Option<&Object> {
        match self {
            Value::Object(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_pointer(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        match self {
            Value::Pointer(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::UInt(v) => write!(f, "UInt({v})"),
            Value::Double(v) => write!(f, "Double({v})"),
            Value::String(v) => write!(f, "String({v:?})"),
            Value::Object(v) => write!(f, "Object({v:?})"),
            Value::Pointer(v) => write!(f, "Pointer({:p})", Arc::as_ptr(v)),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::None
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Value::Object(v)
    }
}

impl From<&Object> for Value {
    fn from(v: &Object) -> Self {
        Value::Object(v.clone())
    }
}
