//! The runtime state behind `Value::Instance`.
//!
//! A flat slot array sized by the defining schema's value-field count,
//! a position in its schema's instance list (for O(1) unlink on
//! delete), and a head pointer to instance-level listeners -- migrated
//! onto the instance once a narrow listener's ground key first matches
//! it.

use crate::listener::ListenerDef;
use crate::schema::SchemaDef;
use reagent_value::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub struct InstanceData {
    pub schema: Rc<SchemaDef>,
    pub slots: RefCell<Vec<Value>>,
    /// `signal`-created rows are never enlisted or indexed; this also
    /// marks an already-deleted instance so a stale reference read after
    /// `delete` doesn't silently resurrect it.
    pub live: Cell<bool>,
    /// Index into `schema.instances`, used to unlink in O(1) via
    /// swap_remove; `None` for transient (`signal`) instances.
    pub list_pos: Cell<Option<usize>>,
    pub listeners: RefCell<Vec<Rc<RefCell<ListenerDef>>>>,
}

impl std::fmt::Debug for InstanceData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<instance of {} (live={})>", self.schema.name, self.live.get())
    }
}

impl InstanceData {
    pub fn new(schema: Rc<SchemaDef>, slots: Vec<Value>) -> Self {
        InstanceData { schema, slots: RefCell::new(slots), live: Cell::new(true), list_pos: Cell::new(None), listeners: RefCell::new(Vec::new()) }
    }

    pub fn slot(&self, i: u32) -> Value {
        self.slots.borrow()[i as usize].clone()
    }

    pub fn set_slot(&self, i: u32, v: Value) {
        self.slots.borrow_mut()[i as usize] = v;
    }
}
