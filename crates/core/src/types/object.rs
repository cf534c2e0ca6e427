use super::Type;
use crate::error::TypeError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an instance, used to key its handler lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Raw id, unique for the life of the process
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct ObjectInner {
    id: InstanceId,
    type_: Type,
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        crate::signal::instance_dropped(self.id);
    }
}

/// A shared handle to an instance of an instantiatable type.
///
/// Handlers connected on the instance are destroyed by [`Object::dispose`],
/// or lazily by the next signal call once the last handle is dropped.
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

impl Object {
    /// Create an instance of `type_`, which must be instantiatable
    pub fn new(type_: Type) -> Result<Object, TypeError> {
        if !type_.is_instantiatable() {
            return Err(TypeError::NotInstantiatable(type_.name().to_owned()));
        }
        let id = InstanceId(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed));
        Ok(Object(Arc::new(ObjectInner { id, type_ })))
    }

    pub fn id(&self) -> InstanceId {
        self.0.id
    }

    pub fn type_(&self) -> Type {
        self.0.type_
    }

    /// Whether the instance's type is `ty` or derives from it
    pub fn is_a(&self, ty: Type) -> bool {
        self.0.type_.is_a(ty)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Drop every signal handler connected on this instance
    pub fn dispose(&self) {
        crate::signal::handlers_destroy(self);
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Object {}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.0.id)
            .field("type", &self.0.type_)
            .finish()
    }
}
