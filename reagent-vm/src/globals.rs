//! The global namespace: named bindings reachable by `def`/`const_call`
//! and not tied to any particular call frame. `var` declarations are
//! never globals -- top-level script locals and REPL-persisted
//! variables are always frame slots closing over externally supplied
//! reference cells (see `reagent-cli`'s console scope).

use crate::action_sink::ActionSink;
use crate::store_hooks::StoreHooks;
use arcstr::ArcStr;
use fxhash::FxHashMap;
use reagent_value::Value;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Default)]
pub struct Globals {
    vars: FxHashMap<ArcStr, Value>,
    store_hooks: Option<Rc<RefCell<dyn StoreHooks>>>,
    action_sink: Option<Rc<RefCell<dyn ActionSink>>>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: ArcStr, value: Value) {
        self.vars.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Wires a `reagent-store` store in as the target of the relational
    /// `ConstCall`s the compiler emits. Called once, at runtime startup.
    pub fn set_store_hooks(&mut self, hooks: Rc<RefCell<dyn StoreHooks>>) {
        self.store_hooks = Some(hooks);
    }

    pub fn store_hooks(&self) -> Option<Rc<RefCell<dyn StoreHooks>>> {
        self.store_hooks.clone()
    }

    /// Wires `reagent-rt`'s event loop in as the destination for enqueued
    /// listener callbacks. Called once, at runtime startup, alongside
    /// `set_store_hooks`.
    pub fn set_action_sink(&mut self, sink: Rc<RefCell<dyn ActionSink>>) {
        self.action_sink = Some(sink);
    }

    pub fn action_sink(&self) -> Option<Rc<RefCell<dyn ActionSink>>> {
        self.action_sink.clone()
    }

    pub fn install_builtin_methods(&mut self) {
        for (name, method) in reagent_value::builtin_methods() {
            self.define(ArcStr::from(name), Value::Method(method));
        }
        for (name, function) in reagent_value::builtin_functions() {
            self.define(ArcStr::from(name), Value::Function(function));
        }
    }
}
