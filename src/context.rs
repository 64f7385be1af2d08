//! The bridge context: one interpreter instance and its public surface.
//!
//! A [`BridgeContext`] owns exactly one interpreter handle for the lifetime
//! of a scripting session. It loads script text, invokes top-level script
//! functions with host arguments, and exposes the keyed global table as the
//! only other sanctioned channel between host and script. All values cross
//! through the marshaler in both directions.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --parse ok--> Ready --(call/resume)*--> Ready
//!                               |
//!                        fatal error (Memory/GarbageCollector/MessageHandler)
//!                               v
//!                            Faulted   (terminal; build a new context)
//! ```
//!
//! A failed parse leaves the previously loaded program and every global
//! intact; parsing again augments or replaces definitions but never resets
//! globals. Dropping the context tears down the interpreter handle and
//! releases all interpreter-side memory.
//!
//! # Threading
//!
//! A context must not be used from multiple threads; the interpreter handle
//! is `!Send`, so the compiler enforces this. Capability registry entries
//! (`Arc<TypeExports>`) may be shared freely across contexts and threads.

use std::cell::{Cell, RefCell};
use std::path::Path;

use mlua::{HookTriggers, Lua, MultiValue, Thread, ThreadStatus, Value as LuaValue};
use tracing::{debug, error};

use crate::error::BridgeError;
use crate::marshal;
use crate::source::{FileLoader, SourceLoader};
use crate::value::Value;

/// Lifecycle state of a [`BridgeContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// No chunk has been loaded yet.
    Uninitialized,
    /// At least one chunk loaded successfully; calls are accepted.
    Ready,
    /// A fatal interpreter error occurred; every further operation is
    /// refused until a new context is created.
    Faulted,
}

/// Result of invoking or resuming a script function.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The function ran to completion. Multi-value returns collapse to the
    /// first value; a function returning nothing completes with nil.
    Completed(Value),
    /// The function suspended at a yield point, handing back the yielded
    /// values. Continue it with [`BridgeContext::resume`].
    ///
    /// A yielded value that cannot be marshaled abandons the call: the
    /// error is returned, nothing is left suspended, and the yielded
    /// values are lost.
    Yielded(Vec<Value>),
}

/// One scripting session: an owned interpreter handle plus the bridge
/// surface around it.
pub struct BridgeContext {
    lua: Lua,
    state: Cell<ContextState>,
    suspended: RefCell<Option<Thread>>,
}

impl BridgeContext {
    /// Create a fresh session with an empty program and empty globals.
    pub fn new() -> Self {
        BridgeContext {
            lua: Lua::new(),
            state: Cell::new(ContextState::Uninitialized),
            suspended: RefCell::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContextState {
        self.state.get()
    }

    // ==========================================================================
    // Parsing
    // ==========================================================================

    /// Compile and run a chunk of script source.
    ///
    /// Running the chunk is what defines its top-level functions, so this
    /// both loads and installs the program. On a syntax error the context
    /// keeps its previous program and returns [`BridgeError::Syntax`] with
    /// the interpreter's diagnostic.
    pub fn parse(&self, source: &str) -> Result<(), BridgeError> {
        self.load_chunk(source, "inline script")
    }

    /// Resolve `location` through `loader`, then parse the text.
    ///
    /// Read failures surface as [`BridgeError::Invalid`]; the loader runs
    /// before any interpreter work, so a failed read changes nothing.
    pub fn parse_from(&self, loader: &dyn SourceLoader, location: &str) -> Result<(), BridgeError> {
        let source = loader.load(location).map_err(|err| {
            BridgeError::Invalid(format!("failed to load script from '{location}': {err}"))
        })?;
        self.load_chunk(&source, location)
    }

    /// Parse a script file from the filesystem.
    pub fn parse_path(&self, path: impl AsRef<Path>) -> Result<(), BridgeError> {
        let location = path.as_ref().to_string_lossy().into_owned();
        self.parse_from(&FileLoader::new(), &location)
    }

    fn load_chunk(&self, source: &str, name: &str) -> Result<(), BridgeError> {
        self.ensure_usable()?;
        self.lua
            .load(source)
            .set_name(name)
            .exec()
            .map_err(|err| self.absorb(err))?;
        if self.state.get() == ContextState::Uninitialized {
            self.state.set(ContextState::Ready);
        }
        debug!(chunk = name, bytes = source.len(), "parsed script chunk");
        Ok(())
    }

    // ==========================================================================
    // Calls
    // ==========================================================================

    /// Invoke a top-level script function by name.
    ///
    /// Arguments are marshaled in, the function runs on a fresh coroutine,
    /// and the result is marshaled out. A missing or non-callable global
    /// yields [`BridgeError::Invalid`] without touching any state. Starting
    /// a new call abandons a previously suspended one.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<CallOutcome, BridgeError> {
        self.ensure_usable()?;
        self.suspended.borrow_mut().take();

        let target = match self
            .lua
            .globals()
            .get::<LuaValue>(name)
            .map_err(|err| self.absorb(err))?
        {
            LuaValue::Function(func) => func,
            LuaValue::Nil => {
                return Err(BridgeError::Invalid(format!(
                    "no script function named '{name}'"
                )));
            }
            other => {
                return Err(BridgeError::Invalid(format!(
                    "global '{name}' is a {}, not a callable function",
                    other.type_name()
                )));
            }
        };

        debug!(function = name, argc = args.len(), "calling script function");
        let thread = self
            .lua
            .create_thread(target)
            .map_err(|err| self.absorb(err))?;
        self.run(thread, args)
    }

    /// Resume the most recently yielded call with `args` as the values
    /// returned from the yield point.
    ///
    /// Returns [`BridgeError::Invalid`] when nothing is suspended.
    pub fn resume(&self, args: &[Value]) -> Result<CallOutcome, BridgeError> {
        self.ensure_usable()?;
        let thread = self
            .suspended
            .borrow_mut()
            .take()
            .ok_or_else(|| BridgeError::Invalid("no suspended call to resume".into()))?;
        self.run(thread, args)
    }

    fn run(&self, thread: Thread, args: &[Value]) -> Result<CallOutcome, BridgeError> {
        let mut lua_args = Vec::with_capacity(args.len());
        for arg in args {
            lua_args.push(marshal::value_to_lua(&self.lua, arg).map_err(|err| self.absorb(err))?);
        }
        let lua_args = MultiValue::from_iter(lua_args);

        match thread.resume::<MultiValue>(lua_args) {
            Ok(values) => {
                let values: Vec<LuaValue> = values.into_iter().collect();
                if thread.status() == ThreadStatus::Resumable {
                    let mut yielded = Vec::with_capacity(values.len());
                    for value in &values {
                        yielded.push(marshal::lua_to_value(value)?);
                    }
                    *self.suspended.borrow_mut() = Some(thread);
                    Ok(CallOutcome::Yielded(yielded))
                } else {
                    let first = values.into_iter().next().unwrap_or(LuaValue::Nil);
                    Ok(CallOutcome::Completed(marshal::lua_to_value(&first)?))
                }
            }
            Err(err) => Err(self.absorb(err)),
        }
    }

    // ==========================================================================
    // Keyed globals
    // ==========================================================================

    /// Read a value from the shared global table.
    pub fn get(&self, key: impl Into<Value>) -> Result<Value, BridgeError> {
        self.ensure_usable()?;
        let key = self.global_key(key.into())?;
        let value: LuaValue = self
            .lua
            .globals()
            .get(key)
            .map_err(|err| self.absorb(err))?;
        marshal::lua_to_value(&value)
    }

    /// Write a value into the shared global table.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<(), BridgeError> {
        self.ensure_usable()?;
        let key = self.global_key(key.into())?;
        let value = marshal::value_to_lua(&self.lua, &value.into()).map_err(|err| self.absorb(err))?;
        self.lua
            .globals()
            .set(key, value)
            .map_err(|err| self.absorb(err))
    }

    fn global_key(&self, key: Value) -> Result<LuaValue, BridgeError> {
        if key.is_nil() {
            return Err(BridgeError::Invalid("nil is not a valid global key".into()));
        }
        marshal::value_to_lua(&self.lua, &key).map_err(|err| self.absorb(err))
    }

    // ==========================================================================
    // Cooperative cancellation
    // ==========================================================================

    /// Bound script execution: abort any call after roughly `instructions`
    /// interpreter instructions.
    ///
    /// The interpreter offers no preemption; this installs a check at its
    /// instruction-count hook points, so an abort surfaces as a
    /// [`BridgeError::Runtime`] from the running call. The budget applies
    /// per call and stays installed until cleared.
    pub fn set_instruction_budget(&self, instructions: u32) {
        let triggers = HookTriggers {
            every_nth_instruction: Some(instructions),
            ..HookTriggers::default()
        };
        let _ = self.lua.set_hook(triggers, move |_lua, _debug| {
            Err(mlua::Error::external(BridgeError::Runtime(
                "instruction budget exhausted".into(),
            )))
        });
    }

    /// Remove a previously installed instruction budget.
    pub fn clear_instruction_budget(&self) {
        self.lua.remove_hook();
    }

    // ==========================================================================
    // Internals
    // ==========================================================================

    fn ensure_usable(&self) -> Result<(), BridgeError> {
        if self.state.get() == ContextState::Faulted {
            return Err(BridgeError::Invalid(
                "bridge context is faulted; create a new context".into(),
            ));
        }
        Ok(())
    }

    /// Classify an interpreter error, transitioning to `Faulted` when the
    /// interpreter handle can no longer be trusted.
    fn absorb(&self, err: mlua::Error) -> BridgeError {
        let bridge = BridgeError::from_interpreter(&err);
        if bridge.is_fatal() {
            error!(kind = ?bridge.kind(), "fatal interpreter error; context faulted");
            self.state.set(ContextState::Faulted);
            self.suspended.borrow_mut().take();
        }
        bridge
    }
}

impl Default for BridgeContext {
    fn default() -> Self {
        BridgeContext::new()
    }
}
