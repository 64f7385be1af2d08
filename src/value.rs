//! Tagged-union value interchange types.
//!
//! [`Value`] is the host-side representation of everything that can cross
//! the interpreter boundary: nil, booleans, integers, floats, strings,
//! sequences, mappings and opaque host-object references. The marshaler
//! converts exhaustively between `Value` and the interpreter's own value
//! model at every boundary crossing.
//!
//! [`HostRef`] is the opaque handle a script sees for an exposed host
//! object. It pairs a non-owning reference to the instance with the
//! capability registry entry for its declared type. The handle is
//! deliberately non-owning: the interpreter signals fatal errors by
//! unwinding the native call stack past ordinary cleanup, so no callback
//! may rely on a local strong reference being released. The host keeps the
//! `Rc`; the bridge keeps a `Weak` and fails cleanly if the instance is
//! gone.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::error::AccessError;
use crate::registry::TypeExports;

/// A key in a [`Value::Mapping`].
///
/// Restricted to the hashable subset of the value model. Floats are wrapped
/// in [`OrderedFloat`] so NaN keys hash consistently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Bool(bool),
    Integer(i64),
    Float(OrderedFloat<f64>),
    Str(String),
}

impl MapKey {
    /// The equivalent [`Value`].
    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Bool(b) => Value::Bool(*b),
            MapKey::Integer(i) => Value::Integer(*i),
            MapKey::Float(f) => Value::Float(f.into_inner()),
            MapKey::Str(s) => Value::Str(s.clone()),
        }
    }

    /// Convert a hashable value into a key. Returns `None` for nil,
    /// sequences, mappings and host objects.
    pub fn from_value(value: &Value) -> Option<MapKey> {
        match value {
            Value::Bool(b) => Some(MapKey::Bool(*b)),
            Value::Integer(i) => Some(MapKey::Integer(*i)),
            Value::Float(f) => Some(MapKey::Float(OrderedFloat(*f))),
            Value::Str(s) => Some(MapKey::Str(s.clone())),
            _ => None,
        }
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        MapKey::Str(s.to_owned())
    }
}

impl From<String> for MapKey {
    fn from(s: String) -> Self {
        MapKey::Str(s)
    }
}

impl From<i64> for MapKey {
    fn from(i: i64) -> Self {
        MapKey::Integer(i)
    }
}

/// A mapping payload: hashable keys to arbitrary values.
pub type Map = FxHashMap<MapKey, Value>;

/// A dynamically typed value crossing the host/interpreter boundary.
///
/// Integers and floats are distinct categories on both sides (Lua 5.4 has
/// native integers), so integer round-trips are exact. Lua floats are
/// `f64`, the same representation as [`Value::Float`], so float round-trips
/// are exact as well.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Str(String),
    Sequence(Vec<Value>),
    Mapping(Map),
    HostObject(HostRef),
}

impl Value {
    /// A short name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
            Value::HostObject(_) => "host object",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view: floats as-is, integers widened to `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Map> {
        match self {
            Value::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_host_object(&self) -> Option<&HostRef> {
        match self {
            Value::HostObject(handle) => Some(handle),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

impl From<HostRef> for Value {
    fn from(handle: HostRef) -> Self {
        Value::HostObject(handle)
    }
}

/// Opaque, non-owning handle to an exposed host object.
///
/// Pairs a `Weak` reference to the instance with the capability registry
/// entry for its declared type. Cloning the handle never extends the
/// instance's lifetime; the host is solely responsible for keeping the
/// object alive for as long as scripts may reach it. Accessing a dropped
/// instance fails with [`AccessError::InstanceGone`] rather than crashing.
#[derive(Clone)]
pub struct HostRef {
    instance: Weak<RefCell<dyn Any>>,
    exports: Arc<TypeExports>,
}

impl HostRef {
    /// Wrap a host object for exposure to scripts.
    ///
    /// Takes a borrowed `Rc` and downgrades it; the caller keeps the strong
    /// reference.
    pub fn new<T: Any>(instance: &Rc<RefCell<T>>, exports: Arc<TypeExports>) -> Self {
        let erased: Rc<RefCell<dyn Any>> = instance.clone();
        HostRef {
            instance: Rc::downgrade(&erased),
            exports,
        }
    }

    /// The capability registry entry governing this handle.
    pub fn exports(&self) -> &Arc<TypeExports> {
        &self.exports
    }

    /// Whether the host still holds the instance.
    pub fn is_alive(&self) -> bool {
        self.instance.strong_count() > 0
    }

    /// Whether two handles refer to the same instance.
    pub fn same_instance(&self, other: &HostRef) -> bool {
        Weak::ptr_eq(&self.instance, &other.instance)
    }

    /// Read a property, checking the capability list first.
    pub fn get(&self, name: &str) -> Result<Value, AccessError> {
        if !self.exports.can_read_property(name) {
            return Err(self.deny_property(name, false));
        }
        let cell = self.upgrade()?;
        let guard = cell.try_borrow().map_err(|_| self.busy())?;
        self.exports.get_property(name, &*guard)
    }

    /// Write a property, checking the capability list first.
    pub fn set(&self, name: &str, value: Value) -> Result<(), AccessError> {
        if !self.exports.can_write_property(name) {
            return Err(self.deny_property(name, true));
        }
        let cell = self.upgrade()?;
        let mut guard = cell.try_borrow_mut().map_err(|_| self.busy())?;
        self.exports.set_property(name, value, &mut *guard)
    }

    /// Invoke a method, checking the capability list first.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, AccessError> {
        if !self.exports.can_call_method(name) {
            warn!(
                type_name = self.exports.type_name(),
                method = name,
                "capability denied"
            );
            return Err(AccessError::NoSuchMember {
                type_name: self.exports.type_name().to_owned(),
                name: name.to_owned(),
            });
        }
        let cell = self.upgrade()?;
        let mut guard = cell.try_borrow_mut().map_err(|_| self.busy())?;
        self.exports.call_method(name, args, &mut *guard)
    }

    /// Run a closure against the concrete instance.
    ///
    /// Intended for method bodies that need to inspect another host object
    /// received as an argument.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, AccessError> {
        let cell = self.upgrade()?;
        let guard = cell.try_borrow().map_err(|_| self.busy())?;
        let concrete = guard.downcast_ref::<T>().ok_or_else(|| {
            AccessError::type_mismatch(
                std::any::type_name::<T>(),
                format!("instance of '{}'", self.exports.type_name()),
            )
        })?;
        Ok(f(concrete))
    }

    fn upgrade(&self) -> Result<Rc<RefCell<dyn Any>>, AccessError> {
        self.instance.upgrade().ok_or_else(|| {
            warn!(
                type_name = self.exports.type_name(),
                "script reached a dropped host instance"
            );
            AccessError::InstanceGone {
                type_name: self.exports.type_name().to_owned(),
            }
        })
    }

    fn busy(&self) -> AccessError {
        AccessError::InstanceBusy {
            type_name: self.exports.type_name().to_owned(),
        }
    }

    fn deny_property(&self, name: &str, write: bool) -> AccessError {
        warn!(
            type_name = self.exports.type_name(),
            property = name,
            write,
            "capability denied"
        );
        let type_name = self.exports.type_name().to_owned();
        if !self.exports.has_member(name) {
            AccessError::NoSuchMember {
                type_name,
                name: name.to_owned(),
            }
        } else if write {
            AccessError::NotWritable {
                type_name,
                name: name.to_owned(),
            }
        } else {
            AccessError::NotReadable {
                type_name,
                name: name.to_owned(),
            }
        }
    }
}

impl PartialEq for HostRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_instance(other)
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRef")
            .field("type", &self.exports.type_name())
            .field("alive", &self.is_alive())
            .finish()
    }
}
