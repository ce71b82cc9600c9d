//! The seam `reagent-store` hooks into the interpreter through.
//!
//! The relational surface forms (`schema`/`insert`/`signal`/`update`/
//! `delete`/`exists`/`when`) compile down to `ConstCall`s against a
//! handful of reserved names (see [`RESERVED_NAMES`]). `reagent-store`
//! can't register ordinary native functions for them the way
//! `reagent-value`'s builtins do, because matching a join step's guard
//! clause or firing a listener body means invoking a `Value::Closure`
//! back through `call_value`, which needs `&mut Globals` -- something a
//! plain `Fn(&[Value]) -> Result<Value, ErrorPayload>` has no way to
//! receive without `reagent-value` depending on this crate. Routing
//! these names through a trait object `Globals` holds, with `&mut
//! Globals` threaded into every call, lets `reagent-store` depend on
//! `reagent-vm` (as it already must, for `Closure`/`call_value`) without
//! a cycle in the other direction.

use crate::globals::Globals;
use reagent_value::{ErrorPayload, Value};

/// Names the compiler emits `ConstCall`s against for relational forms.
/// Checked before the ordinary global lookup so a store wired in via
/// [`Globals::set_store_hooks`] takes priority over any same-named
/// script or builtin definition.
pub const RESERVED_NAMES: &[&str] = &[
    "__define_schema",
    "__insert",
    "__signal",
    "__update",
    "__delete",
    "__exists_lookup",
    "__when_register",
    "__field_get",
];

pub trait StoreHooks {
    fn define_schema(&mut self, descriptor: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload>;
    fn insert(&mut self, schema: &Value, fields: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload>;
    fn signal(&mut self, schema: &Value, fields: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload>;
    fn update(&mut self, schema: &Value, keys: &Value, fields: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload>;
    fn delete(&mut self, schema: &Value, keys: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload>;
    fn exists_lookup(&mut self, step: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload>;
    fn when_register(&mut self, steps: &Value, body: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload>;
    /// Reads a named field off an instance value; used by a computed
    /// field's compiled body to read its declared dependencies, and
    /// available to any script holding an instance reference.
    fn field_get(&mut self, instance: &Value, field: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload>;
}

/// Dispatches a reserved name's `ConstCall` against whatever hooks are
/// installed. Callers check `RESERVED_NAMES` first; this panics if
/// asked for a name it doesn't recognize as a programming error.
pub fn dispatch(
    hooks: &mut dyn StoreHooks,
    name: &str,
    args: &[Value],
    globals: &mut Globals,
) -> Result<Value, ErrorPayload> {
    match name {
        "__define_schema" => hooks.define_schema(&args[0], globals),
        "__insert" => hooks.insert(&args[0], &args[1], globals),
        "__signal" => hooks.signal(&args[0], &args[1], globals),
        "__update" => hooks.update(&args[0], &args[1], &args[2], globals),
        "__delete" => hooks.delete(&args[0], &args[1], globals),
        "__exists_lookup" => hooks.exists_lookup(&args[0], globals),
        "__when_register" => hooks.when_register(&args[0], &args[1], globals),
        "__field_get" => hooks.field_get(&args[0], &args[1], globals),
        other => unreachable!("not a reserved store name: {other}"),
    }
}
