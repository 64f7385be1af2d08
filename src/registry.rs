//! Capability registry: per-type allow-lists for script access.
//!
//! [`TypeExports`] is the registry entry for one exposed host type. It
//! records which properties a script may read or write and which methods it
//! may call, together with a free-form type-signature string per member and
//! the accessor closures supplied at registration time.
//!
//! The allow-list is authoritative: an access not listed here is refused by
//! the bridge regardless of what the underlying Rust type supports.
//! Membership checks run on every script-side field or method access, so
//! they are O(1) hash lookups.
//!
//! # Storage Model
//!
//! Accessors are registered against a concrete `T: Any` and stored
//! type-erased, taking `&dyn Any` / `&mut dyn Any` instances. Registration
//! is separate from use: a `TypeExports` is populated once at
//! type-registration time, wrapped in `Arc`, and from then on consulted
//! read-only. Re-registering a member name overwrites the prior entry.
//!
//! # Thread Safety
//!
//! Once wrapped in `Arc`, a `TypeExports` may be shared across bridge
//! contexts on independent threads: it has no mutable state and all
//! accessor closures are `Send + Sync`.

use std::any::Any;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::error::AccessError;
use crate::value::Value;

bitflags! {
    /// Access attributes of an exported property.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertyAttrs: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

impl PropertyAttrs {
    pub fn read_only() -> Self {
        PropertyAttrs::READ
    }

    pub fn read_write() -> Self {
        PropertyAttrs::READ | PropertyAttrs::WRITE
    }
}

/// Type-erased property getter.
pub type GetterFn = Box<dyn Fn(&dyn Any) -> Result<Value, AccessError> + Send + Sync>;
/// Type-erased property setter.
pub type SetterFn = Box<dyn Fn(&mut dyn Any, Value) -> Result<(), AccessError> + Send + Sync>;
/// Type-erased method body.
pub type MethodFn = Box<dyn Fn(&mut dyn Any, &[Value]) -> Result<Value, AccessError> + Send + Sync>;

struct PropertyExport {
    attrs: PropertyAttrs,
    signature: String,
    getter: Option<GetterFn>,
    setter: Option<SetterFn>,
}

struct MethodExport {
    signature: String,
    body: MethodFn,
}

/// Capability registry entry for one exposed host type.
pub struct TypeExports {
    type_name: String,
    properties: FxHashMap<String, PropertyExport>,
    methods: FxHashMap<String, MethodExport>,
}

impl TypeExports {
    /// Create an empty entry. Everything is denied until registered.
    pub fn new(type_name: impl Into<String>) -> Self {
        TypeExports {
            type_name: type_name.into(),
            properties: FxHashMap::default(),
            methods: FxHashMap::default(),
        }
    }

    /// The declared name of the exposed type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    // ==========================================================================
    // Registration
    // ==========================================================================

    /// Register a property with explicit attributes and accessors.
    ///
    /// `signature` is free-form metadata describing the value encoding; the
    /// bridge stores it for diagnostics and does not interpret it.
    /// Idempotent per name: a later registration replaces the earlier one
    /// entirely.
    pub fn add_property(
        &mut self,
        name: impl Into<String>,
        attrs: PropertyAttrs,
        signature: impl Into<String>,
        getter: Option<GetterFn>,
        setter: Option<SetterFn>,
    ) {
        self.properties.insert(
            name.into(),
            PropertyExport {
                attrs,
                signature: signature.into(),
                getter,
                setter,
            },
        );
    }

    /// Register a read-only property backed by a typed getter closure.
    pub fn read_only<T, G>(&mut self, name: impl Into<String>, signature: impl Into<String>, get: G)
    where
        T: Any,
        G: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let type_name = self.type_name.clone();
        let getter: GetterFn = Box::new(move |instance| {
            let concrete = downcast::<T>(instance, &type_name)?;
            Ok(get(concrete))
        });
        self.add_property(
            name,
            PropertyAttrs::read_only(),
            signature,
            Some(getter),
            None,
        );
    }

    /// Register a read-write property backed by typed accessor closures.
    ///
    /// The setter receives the marshaled-in value and is responsible for
    /// checking its category, typically via the `Value::as_*` helpers.
    pub fn read_write<T, G, S>(
        &mut self,
        name: impl Into<String>,
        signature: impl Into<String>,
        get: G,
        set: S,
    ) where
        T: Any,
        G: Fn(&T) -> Value + Send + Sync + 'static,
        S: Fn(&mut T, Value) -> Result<(), AccessError> + Send + Sync + 'static,
    {
        let getter_type = self.type_name.clone();
        let getter: GetterFn = Box::new(move |instance| {
            let concrete = downcast::<T>(instance, &getter_type)?;
            Ok(get(concrete))
        });
        let setter_type = self.type_name.clone();
        let setter: SetterFn = Box::new(move |instance, value| {
            let concrete = downcast_mut::<T>(instance, &setter_type)?;
            set(concrete, value)
        });
        self.add_property(
            name,
            PropertyAttrs::read_write(),
            signature,
            Some(getter),
            Some(setter),
        );
    }

    /// Register a callable method with a pre-erased body.
    ///
    /// Idempotent per name, like property registration.
    pub fn add_method(
        &mut self,
        name: impl Into<String>,
        signature: impl Into<String>,
        body: MethodFn,
    ) {
        self.methods.insert(
            name.into(),
            MethodExport {
                signature: signature.into(),
                body,
            },
        );
    }

    /// Register a callable method backed by a typed closure.
    pub fn method<T, F>(&mut self, name: impl Into<String>, signature: impl Into<String>, body: F)
    where
        T: Any,
        F: Fn(&mut T, &[Value]) -> Result<Value, AccessError> + Send + Sync + 'static,
    {
        let type_name = self.type_name.clone();
        let erased: MethodFn = Box::new(move |instance, args| {
            let concrete = downcast_mut::<T>(instance, &type_name)?;
            body(concrete, args)
        });
        self.add_method(name, signature, erased);
    }

    // ==========================================================================
    // Membership queries (hot path)
    // ==========================================================================

    pub fn can_read_property(&self, name: &str) -> bool {
        self.properties
            .get(name)
            .is_some_and(|p| p.attrs.contains(PropertyAttrs::READ))
    }

    pub fn can_write_property(&self, name: &str) -> bool {
        self.properties
            .get(name)
            .is_some_and(|p| p.attrs.contains(PropertyAttrs::WRITE))
    }

    pub fn can_call_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Whether any member of this name is registered, readable or not.
    /// Used to distinguish "no such member" from "not permitted".
    pub fn has_member(&self, name: &str) -> bool {
        self.properties.contains_key(name) || self.methods.contains_key(name)
    }

    /// Attributes of a registered property, if any.
    pub fn property_attrs(&self, name: &str) -> Option<PropertyAttrs> {
        self.properties.get(name).map(|p| p.attrs)
    }

    /// Signature metadata of a registered property, if any.
    pub fn property_signature(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(|p| p.signature.as_str())
    }

    /// Signature metadata of a registered method, if any.
    pub fn method_signature(&self, name: &str) -> Option<&str> {
        self.methods.get(name).map(|m| m.signature.as_str())
    }

    // ==========================================================================
    // Access (capability already validated by the caller)
    // ==========================================================================

    /// Invoke the getter for a pre-validated property name.
    ///
    /// Does not re-check `can_read_property`; callers route through the
    /// membership query first.
    pub fn get_property(&self, name: &str, instance: &dyn Any) -> Result<Value, AccessError> {
        let export = self.properties.get(name).ok_or_else(|| self.missing(name))?;
        let getter = export.getter.as_ref().ok_or_else(|| {
            AccessError::NotReadable {
                type_name: self.type_name.clone(),
                name: name.to_owned(),
            }
        })?;
        getter(instance)
    }

    /// Invoke the setter for a pre-validated property name.
    pub fn set_property(
        &self,
        name: &str,
        value: Value,
        instance: &mut dyn Any,
    ) -> Result<(), AccessError> {
        let export = self.properties.get(name).ok_or_else(|| self.missing(name))?;
        let setter = export.setter.as_ref().ok_or_else(|| {
            AccessError::NotWritable {
                type_name: self.type_name.clone(),
                name: name.to_owned(),
            }
        })?;
        setter(instance, value)
    }

    /// Invoke a pre-validated method with marshaled-in arguments.
    pub fn call_method(
        &self,
        name: &str,
        args: &[Value],
        instance: &mut dyn Any,
    ) -> Result<Value, AccessError> {
        let export = self.methods.get(name).ok_or_else(|| self.missing(name))?;
        (export.body)(instance, args)
    }

    fn missing(&self, name: &str) -> AccessError {
        AccessError::NoSuchMember {
            type_name: self.type_name.clone(),
            name: name.to_owned(),
        }
    }
}

impl std::fmt::Debug for TypeExports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeExports")
            .field("type", &self.type_name)
            .field("properties", &self.properties.len())
            .field("methods", &self.methods.len())
            .finish()
    }
}

fn downcast<'a, T: Any>(instance: &'a dyn Any, type_name: &str) -> Result<&'a T, AccessError> {
    instance.downcast_ref::<T>().ok_or_else(|| {
        AccessError::type_mismatch(
            format!("instance of '{type_name}'"),
            "a different host type",
        )
    })
}

fn downcast_mut<'a, T: Any>(
    instance: &'a mut dyn Any,
    type_name: &str,
) -> Result<&'a mut T, AccessError> {
    instance.downcast_mut::<T>().ok_or_else(|| {
        AccessError::type_mismatch(
            format!("instance of '{type_name}'"),
            "a different host type",
        )
    })
}
