//! Two-way value marshaling across the interpreter boundary.
//!
//! Host [`Value`]s convert to interpreter values and back at every boundary
//! crossing: globals, call arguments and results, and the arguments of
//! script-initiated member access. Conversion is exhaustive over the host
//! model; on the way out, interpreter values with no host counterpart
//! (functions, threads, light userdata, foreign userdata) yield an
//! `Invalid` error naming the offending type rather than crashing.
//!
//! Table disambiguation: an interpreter table whose keys are exactly
//! `1..=n` decodes as [`Value::Sequence`]; every other table, including the
//! empty one, decodes as [`Value::Mapping`]. Nesting depth is bounded so a
//! cyclic table is an error rather than a stack overflow.
//!
//! This module also owns the userdata glue for [`HostRef`]: the `__index` /
//! `__newindex` metamethods that route script-side member access through
//! the capability registry before any accessor runs.

use mlua::{Lua, MetaMethod, MultiValue, UserData, UserDataMethods, Value as LuaValue};
use ordered_float::OrderedFloat;

use crate::error::BridgeError;
use crate::value::{HostRef, Map, MapKey, Value};

/// Nesting bound for sequences and mappings in either direction.
const MAX_MARSHAL_DEPTH: usize = 64;

fn depth_exceeded() -> BridgeError {
    BridgeError::Invalid(format!(
        "value nesting exceeds the marshal depth limit of {MAX_MARSHAL_DEPTH}"
    ))
}

/// Convert a host value into an interpreter value.
pub(crate) fn value_to_lua(lua: &Lua, value: &Value) -> mlua::Result<LuaValue> {
    encode(lua, value, 0)
}

fn encode(lua: &Lua, value: &Value, depth: usize) -> mlua::Result<LuaValue> {
    if depth > MAX_MARSHAL_DEPTH {
        return Err(mlua::Error::external(depth_exceeded()));
    }
    match value {
        Value::Nil => Ok(LuaValue::Nil),
        Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        Value::Integer(i) => Ok(LuaValue::Integer(*i)),
        Value::Float(f) => Ok(LuaValue::Number(*f)),
        Value::Str(s) => Ok(LuaValue::String(lua.create_string(s)?)),
        Value::Sequence(items) => {
            let table = lua.create_table()?;
            for (index, item) in items.iter().enumerate() {
                table.raw_set(index as i64 + 1, encode(lua, item, depth + 1)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        Value::Mapping(map) => {
            let table = lua.create_table()?;
            for (key, item) in map {
                table.raw_set(key_to_lua(lua, key)?, encode(lua, item, depth + 1)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        Value::HostObject(handle) => Ok(LuaValue::UserData(lua.create_userdata(handle.clone())?)),
    }
}

fn key_to_lua(lua: &Lua, key: &MapKey) -> mlua::Result<LuaValue> {
    match key {
        MapKey::Bool(b) => Ok(LuaValue::Boolean(*b)),
        MapKey::Integer(i) => Ok(LuaValue::Integer(*i)),
        MapKey::Float(f) => Ok(LuaValue::Number(f.into_inner())),
        MapKey::Str(s) => Ok(LuaValue::String(lua.create_string(s)?)),
    }
}

/// Convert an interpreter value into a host value.
///
/// A userdata carrying a [`HostRef`] comes back as [`Value::HostObject`];
/// any other non-primitive interpreter value is unsupported.
pub(crate) fn lua_to_value(value: &LuaValue) -> Result<Value, BridgeError> {
    decode(value, 0)
}

fn decode(value: &LuaValue, depth: usize) -> Result<Value, BridgeError> {
    if depth > MAX_MARSHAL_DEPTH {
        return Err(depth_exceeded());
    }
    match value {
        LuaValue::Nil => Ok(Value::Nil),
        LuaValue::Boolean(b) => Ok(Value::Bool(*b)),
        LuaValue::Integer(i) => Ok(Value::Integer(*i)),
        LuaValue::Number(n) => Ok(Value::Float(*n)),
        LuaValue::String(s) => Ok(Value::Str(s.to_string_lossy().to_string())),
        LuaValue::Table(table) => {
            let mut entries = Vec::new();
            for pair in table.clone().pairs::<LuaValue, LuaValue>() {
                entries.push(pair?);
            }
            decode_table(entries, depth)
        }
        LuaValue::UserData(ud) => match ud.borrow::<HostRef>() {
            Ok(handle) => Ok(Value::HostObject((*handle).clone())),
            Err(_) => Err(BridgeError::Invalid(
                "cannot marshal foreign userdata into a host value".into(),
            )),
        },
        other => Err(BridgeError::Invalid(format!(
            "cannot marshal interpreter {} into a host value",
            other.type_name()
        ))),
    }
}

fn decode_table(entries: Vec<(LuaValue, LuaValue)>, depth: usize) -> Result<Value, BridgeError> {
    if let Some(items) = sequence_slots(&entries) {
        let mut sequence = Vec::with_capacity(items.len());
        for item in items {
            sequence.push(decode(item, depth + 1)?);
        }
        return Ok(Value::Sequence(sequence));
    }

    let mut map = Map::default();
    for (key, item) in &entries {
        map.insert(decode_key(key)?, decode(item, depth + 1)?);
    }
    Ok(Value::Mapping(map))
}

/// Return the values in index order when the keys are exactly `1..=n`.
fn sequence_slots(entries: &[(LuaValue, LuaValue)]) -> Option<Vec<&LuaValue>> {
    if entries.is_empty() {
        return None;
    }
    let mut indexed = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        match key {
            LuaValue::Integer(i) if *i >= 1 => indexed.push((*i, value)),
            _ => return None,
        }
    }
    indexed.sort_by_key(|(i, _)| *i);
    let contiguous = indexed
        .iter()
        .enumerate()
        .all(|(pos, (i, _))| *i == pos as i64 + 1);
    contiguous.then(|| indexed.into_iter().map(|(_, v)| v).collect())
}

fn decode_key(key: &LuaValue) -> Result<MapKey, BridgeError> {
    match key {
        LuaValue::Boolean(b) => Ok(MapKey::Bool(*b)),
        LuaValue::Integer(i) => Ok(MapKey::Integer(*i)),
        LuaValue::Number(n) => Ok(MapKey::Float(OrderedFloat(*n))),
        LuaValue::String(s) => Ok(MapKey::Str(s.to_string_lossy().to_string())),
        other => Err(BridgeError::Invalid(format!(
            "unsupported mapping key of interpreter type {}",
            other.type_name()
        ))),
    }
}

/// Script-side surface of a [`HostRef`].
///
/// `__index` resolves readable properties and callable methods, in that
/// order of precedence; `__newindex` resolves writable properties. Both
/// consult the capability registry before touching the instance, and a
/// denial raises a catchable interpreter error. Method lookups return a
/// bound function that accepts both `obj:m(...)` and `obj.m(...)` calling
/// conventions: a leading argument referring to the same instance is
/// treated as the receiver and dropped.
impl UserData for HostRef {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: String| {
            let exports = this.exports();
            if !exports.can_read_property(&key) && exports.can_call_method(&key) {
                let target = this.clone();
                let func = lua.create_function(move |lua, args: MultiValue| {
                    invoke_bound_method(lua, &target, &key, args)
                })?;
                return Ok(LuaValue::Function(func));
            }
            // Readable properties and denials both resolve here.
            let value = this.get(&key).map_err(mlua::Error::from)?;
            value_to_lua(lua, &value)
        });

        methods.add_meta_method(
            MetaMethod::NewIndex,
            |_lua, this, (key, value): (String, LuaValue)| {
                let value = lua_to_value(&value).map_err(mlua::Error::external)?;
                this.set(&key, value).map_err(mlua::Error::from)?;
                Ok(())
            },
        );

        methods.add_meta_method(MetaMethod::Eq, |_lua, this, other: mlua::AnyUserData| {
            Ok(other
                .borrow::<HostRef>()
                .map(|o| o.same_instance(this))
                .unwrap_or(false))
        });

        methods.add_meta_method(MetaMethod::ToString, |_lua, this, ()| {
            Ok(format!("<host {}>", this.exports().type_name()))
        });
    }
}

fn invoke_bound_method(
    lua: &Lua,
    target: &HostRef,
    name: &str,
    args: MultiValue,
) -> mlua::Result<LuaValue> {
    let mut lua_args: Vec<LuaValue> = args.into_iter().collect();

    // Colon-call convention passes the receiver as the first argument.
    if let Some(LuaValue::UserData(ud)) = lua_args.first() {
        if let Ok(receiver) = ud.borrow::<HostRef>() {
            if receiver.same_instance(target) {
                lua_args.remove(0);
            }
        }
    }

    let mut host_args = Vec::with_capacity(lua_args.len());
    for arg in &lua_args {
        host_args.push(lua_to_value(arg).map_err(mlua::Error::external)?);
    }

    let result = target.call(name, &host_args)?;
    value_to_lua(lua, &result)
}
