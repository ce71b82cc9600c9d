//! Multi-field indices over a schema's live instances.
//!
//! An index is keyed by a tuple of field values, ordered by
//! `(hash(key tuple), natural_compare)` exactly like the `tree` value
//! type (`reagent_value::Tree`) already orders its keys -- reusing it
//! here instead of a bespoke AVL map means the index inherits its
//! balance invariant and total-order tie-break for free.

use arcstr::ArcStr;
use reagent_value::{method::natural_compare, ErrorPayload, List, Tree, Value};
use std::cell::RefCell;
use std::rc::Rc;

pub struct IndexDef {
    pub fields: Vec<ArcStr>,
    tree: Tree,
    /// The same-keyed index on the immediate parent schema, if any. An
    /// insert/remove here also applies there, which is what lets an
    /// ancestor schema's listeners observe a descendant schema's rows.
    pub parent: RefCell<Option<Rc<IndexDef>>>,
}

impl std::fmt::Debug for IndexDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<index {:?} ({} entries)>", self.fields, self.len())
    }
}

impl IndexDef {
    pub fn new(fields: Vec<ArcStr>, parent: Option<Rc<IndexDef>>) -> Self {
        IndexDef { fields, tree: Tree::new(), parent: RefCell::new(parent) }
    }

    pub fn key(values: Vec<Value>) -> Value {
        Value::List(List::from_iter(values))
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>, ErrorPayload> {
        self.tree.get(key, &mut natural_compare)
    }

    pub fn contains(&self, key: &Value) -> Result<bool, ErrorPayload> {
        self.tree.contains(key, &mut natural_compare)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Inserts into this index and every ancestor index chained through
    /// `parent`.
    pub fn insert_chain(&self, key: &Value, instance: &Value) -> Result<(), ErrorPayload> {
        self.tree.insert(key.clone(), instance.clone(), &mut natural_compare)?;
        if let Some(p) = self.parent.borrow().as_ref() {
            p.insert_chain(key, instance)?;
        }
        Ok(())
    }

    pub fn remove_chain(&self, key: &Value) -> Result<(), ErrorPayload> {
        self.tree.remove(key, &mut natural_compare)?;
        if let Some(p) = self.parent.borrow().as_ref() {
            p.remove_chain(key)?;
        }
        Ok(())
    }
}
