//! Minimal runtime type system
//!
//! Signals are owned by types and connected on instances, so the engine needs
//! to know, for any instance, its type, that type's ancestors and the
//! interfaces it implements. This module provides exactly that: a process-wide
//! registry of fundamental, object and interface types plus per-type class
//! virtual slots used by class-slot closures.


mod object;

pub use object::{InstanceId, Object};

use crate::closure::Callback;
use crate::error::TypeError;
use crate::quark::Quark;
use ahash::RandomState;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

/// Handle to a registered type
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Type(u32);

impl Type {
    /// Not a type. Also the key of a signal's default class closure.
    pub const INVALID: Type = Type(0);
    pub const NONE: Type = Type(1);
    pub const BOOL: Type = Type(2);
    pub const INT: Type = Type(3);
    pub const UINT: Type = Type(4);
    pub const DOUBLE: Type = Type(5);
    pub const STRING: Type = Type(6);
    pub const POINTER: Type = Type(7);
    /// Root of all instantiatable types
    pub const OBJECT: Type = Type(8);
    /// Root of all interface types
    pub const INTERFACE: Type = Type(9);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeKind {
    Fundamental { value: bool },
    Object,
    Interface,
}

struct TypeNode {
    name: Quark,
    parent: Option<Type>,
    kind: TypeKind,
    /// Interfaces added directly on this type
    interfaces: Vec<Type>,
    vfuncs: HashMap<Quark, Callback, RandomState>,
}

impl TypeNode {
    fn new(name: &str, parent: Option<Type>, kind: TypeKind) -> Self {
        Self {
            name: Quark::intern(name),
            parent,
            kind,
            interfaces: Vec::new(),
            vfuncs: HashMap::default(),
        }
    }
}

struct TypeRegistry {
    nodes: Vec<TypeNode>,
    by_name: HashMap<Quark, Type, RandomState>,
}

impl TypeRegistry {
    fn with_fundamentals() -> Self {
        let mut registry = Self {
            nodes: Vec::new(),
            by_name: HashMap::default(),
        };
        let fundamentals = [
            ("invalid", TypeKind::Fundamental { value: false }),
            ("none", TypeKind::Fundamental { value: false }),
            ("bool", TypeKind::Fundamental { value: true }),
            ("int", TypeKind::Fundamental { value: true }),
            ("uint", TypeKind::Fundamental { value: true }),
            ("double", TypeKind::Fundamental { value: true }),
            ("string", TypeKind::Fundamental { value: true }),
            ("pointer", TypeKind::Fundamental { value: true }),
            ("Object", TypeKind::Object),
            ("Interface", TypeKind::Interface),
        ];
        for (name, kind) in fundamentals {
            registry.push(TypeNode::new(name, None, kind));
        }
        registry
    }

    fn push(&mut self, node: TypeNode) -> Type {
        let ty = Type(self.nodes.len() as u32);
        self.by_name.insert(node.name, ty);
        self.nodes.push(node);
        ty
    }

    fn node(&self, ty: Type) -> Option<&TypeNode> {
        self.nodes.get(ty.0 as usize)
    }

    fn kind(&self, ty: Type) -> Option<TypeKind> {
        self.node(ty).map(|node| node.kind)
    }

    fn ancestors(&self, ty: Type) -> Vec<Type> {
        let mut chain = Vec::new();
        let mut current = Some(ty);
        while let Some(t) = current {
            let Some(node) = self.node(t) else { break };
            chain.push(t);
            current = node.parent;
        }
        chain
    }

    fn interfaces(&self, ty: Type) -> Vec<Type> {
        let mut result: Vec<Type> = Vec::new();
        // Walk root-first so inherited interfaces come before own ones
        for t in self.ancestors(ty).into_iter().rev() {
            if let Some(node) = self.node(t) {
                for iface in &node.interfaces {
                    if !result.contains(iface) {
                        result.push(*iface);
                    }
                }
            }
        }
        result
    }

    fn is_a(&self, ty: Type, other: Type) -> bool {
        if ty == other {
            return self.node(ty).is_some();
        }
        if self.ancestors(ty).contains(&other) {
            return true;
        }
        self.kind(other) == Some(TypeKind::Interface) && self.interfaces(ty).contains(&other)
    }

    fn is_instantiatable(&self, ty: Type) -> bool {
        self.kind(ty) == Some(TypeKind::Object)
    }
}

static TYPES: Lazy<RwLock<TypeRegistry>> =
    Lazy::new(|| RwLock::new(TypeRegistry::with_fundamentals()));

fn validate_name(name: &str) -> Result<(), TypeError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+')) {
        Ok(())
    } else {
        Err(TypeError::InvalidName(name.to_owned()))
    }
}

impl Type {
    /// Register an instantiatable type deriving from `parent`
    pub fn register_object(name: &str, parent: Type) -> Result<Type, TypeError> {
        validate_name(name)?;
        let mut registry = TYPES.write();
        if registry.by_name.contains_key(&Quark::intern(name)) {
            return Err(TypeError::NameTaken(name.to_owned()));
        }
        if !registry.is_instantiatable(parent) {
            let parent_name = registry
                .node(parent)
                .map(|node| node.name.as_str())
                .unwrap_or("<invalid>");
            return Err(TypeError::NotInstantiatable(parent_name.to_owned()));
        }
        let ty = registry.push(TypeNode::new(name, Some(parent), TypeKind::Object));
        tracing::debug!(type_name = name, "registered object type");
        Ok(ty)
    }

    /// Register an interface type
    pub fn register_interface(name: &str) -> Result<Type, TypeError> {
        validate_name(name)?;
        let mut registry = TYPES.write();
        if registry.by_name.contains_key(&Quark::intern(name)) {
            return Err(TypeError::NameTaken(name.to_owned()));
        }
        let ty = registry.push(TypeNode::new(
            name,
            Some(Type::INTERFACE),
            TypeKind::Interface,
        ));
        tracing::debug!(type_name = name, "registered interface type");
        Ok(ty)
    }

    /// Declare that this instantiatable type implements `iface`
    pub fn add_interface(self, iface: Type) -> Result<(), TypeError> {
        let mut registry = TYPES.write();
        if !registry.is_instantiatable(self) {
            return Err(TypeError::NotInstantiatable(self.debug_name(&registry)));
        }
        if registry.kind(iface) != Some(TypeKind::Interface) || iface == Type::INTERFACE {
            return Err(TypeError::NotAnInterface(iface.debug_name(&registry)));
        }
        let node = &mut registry.nodes[self.0 as usize];
        if !node.interfaces.contains(&iface) {
            node.interfaces.push(iface);
        }
        Ok(())
    }

    /// The registered type called `name`
    pub fn from_name(name: &str) -> Option<Type> {
        let quark = Quark::lookup(name)?;
        TYPES.read().by_name.get(&quark).copied()
    }

    fn debug_name(self, registry: &TypeRegistry) -> String {
        registry
            .node(self)
            .map(|node| node.name.as_str().to_owned())
            .unwrap_or_else(|| format!("<invalid type {}>", self.0))
    }

    /// Registered name, or `<invalid>`
    pub fn name(self) -> &'static str {
        TYPES
            .read()
            .node(self)
            .map(|node| node.name.as_str())
            .unwrap_or("<invalid>")
    }

    /// Direct parent, `None` for fundamentals and roots
    pub fn parent(self) -> Option<Type> {
        TYPES.read().node(self).and_then(|node| node.parent)
    }

    /// This type followed by its parent chain up to the root
    pub fn ancestors(self) -> Vec<Type> {
        TYPES.read().ancestors(self)
    }

    /// Interfaces implemented by this type, including inherited ones
    pub fn interfaces(self) -> Vec<Type> {
        TYPES.read().interfaces(self)
    }

    /// Whether this type is `other`, derives from it or implements it
    pub fn is_a(self, other: Type) -> bool {
        TYPES.read().is_a(self, other)
    }

    /// Whether values of this type can be passed as signal parameters
    pub fn is_value_type(self) -> bool {
        match TYPES.read().kind(self) {
            Some(TypeKind::Fundamental { value }) => value,
            Some(TypeKind::Object) => true,
            Some(TypeKind::Interface) | None => false,
        }
    }

    /// Whether [`Object::new`] accepts this type
    pub fn is_instantiatable(self) -> bool {
        TYPES.read().is_instantiatable(self)
    }

    pub fn is_interface(self) -> bool {
        TYPES.read().kind(self) == Some(TypeKind::Interface)
    }

    /// Install the class implementation of virtual slot `slot` for this type.
    ///
    /// Subtypes inherit it unless they install their own.
    pub fn set_class_vfunc(self, slot: &str, handler: Callback) -> Result<(), TypeError> {
        let mut registry = TYPES.write();
        match registry.kind(self) {
            Some(TypeKind::Object | TypeKind::Interface) => {
                registry.nodes[self.0 as usize]
                    .vfuncs
                    .insert(Quark::intern(slot), handler);
                Ok(())
            }
            _ => Err(TypeError::NotInstantiatable(self.debug_name(&registry))),
        }
    }

    /// Resolve class slot `slot` by name; see [`Type::set_class_vfunc`]
    pub fn class_vfunc(self, slot: &str) -> Option<Callback> {
        Quark::lookup(slot).and_then(|slot| self.class_vfunc_by_quark(slot))
    }

    /// Resolve `slot` on this type, its ancestors, then its interfaces
    pub fn class_vfunc_by_quark(self, slot: Quark) -> Option<Callback> {
        let registry = TYPES.read();
        let from_class = registry
            .ancestors(self)
            .into_iter()
            .find_map(|t| registry.node(t).and_then(|node| node.vfuncs.get(&slot)));
        if let Some(handler) = from_class {
            return Some(handler.clone());
        }
        registry
            .interfaces(self)
            .into_iter()
            .find_map(|iface| registry.node(iface).and_then(|node| node.vfuncs.get(&slot)))
            .cloned()
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.name())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
