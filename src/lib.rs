//! Capability-scoped Lua scripting bridge for host applications.
//!
//! `luahost` embeds a Lua interpreter and exposes a controlled subset of
//! host object properties and methods to scripts, while exposing scripting
//! results back to host code.
//!
//! ## Architecture
//!
//! ```text
//! BridgeContext (owns one interpreter handle)
//! ├── parse / parse_from     - load script chunks
//! ├── call / resume          - invoke top-level script functions
//! ├── get / set              - keyed global table access
//! └── script callbacks ──> TypeExports (capability registry, per type)
//!                            └── accessor closures over host instances
//!          both directions ──> marshal (Value <-> interpreter values)
//! ```
//!
//! Host objects cross the boundary as non-owning [`HostRef`] handles: the
//! host keeps the `Rc`, the bridge keeps a `Weak`, and nothing script-side
//! ever extends an instance's lifetime. Every access a script makes goes
//! through the per-type allow-list first; anything unregistered is refused
//! regardless of what the underlying Rust type supports.
//!
//! ## Example
//!
//! ```no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::sync::Arc;
//! use luahost::{BridgeContext, CallOutcome, HostRef, TypeExports, Value};
//!
//! struct Point { x: f64 }
//!
//! let mut exports = TypeExports::new("Point");
//! exports.read_only::<Point, _>("x", "float", |p| Value::Float(p.x));
//! let exports = Arc::new(exports);
//!
//! let ctx = BridgeContext::new();
//! ctx.parse("function run(p) return p.x + 1 end").unwrap();
//!
//! let point = Rc::new(RefCell::new(Point { x: 5.0 }));
//! let handle = HostRef::new(&point, exports);
//! let outcome = ctx.call("run", &[Value::HostObject(handle)]).unwrap();
//! assert_eq!(outcome, CallOutcome::Completed(Value::Float(6.0)));
//! ```

pub mod context;
pub mod error;
mod marshal;
pub mod registry;
pub mod source;
pub mod value;

pub use context::{BridgeContext, CallOutcome, ContextState};
pub use error::{AccessError, BridgeError, ErrorKind};
pub use registry::{GetterFn, MethodFn, PropertyAttrs, SetterFn, TypeExports};
pub use source::{FileLoader, SourceLoader};
pub use value::{HostRef, Map, MapKey, Value};

pub mod prelude {
    pub use crate::context::{BridgeContext, CallOutcome, ContextState};
    pub use crate::error::{AccessError, BridgeError, ErrorKind};
    pub use crate::registry::{PropertyAttrs, TypeExports};
    pub use crate::source::{FileLoader, SourceLoader};
    pub use crate::value::{HostRef, MapKey, Value};
}
