//! The `tree` value type: an ordered map keyed by arbitrary reagent
//! values, backed by [`crate::avl::AvlTree`].
//!
//! Ordering is primary by `hash_value` and only consults the supplied
//! comparator -- normally [`crate::method::natural_compare`], or a
//! dispatched `?` method further up the stack -- on a hash collision, so
//! well-behaved keys never pay for a dispatch at all.

use crate::avl::AvlTree;
use crate::error::ErrorPayload;
use crate::hash::hash_value;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

pub type Compare<'a> = &'a mut dyn FnMut(&Value, &Value) -> Result<std::cmp::Ordering, ErrorPayload>;

#[derive(Debug, Clone)]
pub struct Tree(Rc<RefCell<AvlTree<Value, Value>>>);

impl Tree {
    pub fn new() -> Self {
        Tree(Rc::new(RefCell::new(AvlTree::new())))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, key: &Value, cmp: Compare<'_>) -> Result<Option<Value>, ErrorPayload> {
        let hash = hash_value(key);
        Ok(self.0.borrow().get(hash, key, cmp)?.cloned())
    }

    pub fn contains(&self, key: &Value, cmp: Compare<'_>) -> Result<bool, ErrorPayload> {
        let hash = hash_value(key);
        self.0.borrow().contains(hash, key, cmp)
    }

    pub fn insert(
        &self,
        key: Value,
        value: Value,
        cmp: Compare<'_>,
    ) -> Result<Option<Value>, ErrorPayload> {
        let hash = hash_value(&key);
        self.0.borrow_mut().insert(hash, key, value, cmp)
    }

    pub fn remove(&self, key: &Value, cmp: Compare<'_>) -> Result<Option<Value>, ErrorPayload> {
        let hash = hash_value(key);
        self.0.borrow_mut().remove(hash, key, cmp)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> {
        self.0.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Vec<_>>().into_iter()
    }

    pub fn ptr_eq(&self, other: &Tree) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::natural_compare;

    #[test]
    fn insert_and_lookup_integers() {
        let t = Tree::new();
        for i in 0..50i64 {
            t.insert(Value::Integer(i), Value::Integer(i * 2), &mut natural_compare).unwrap();
        }
        assert_eq!(t.len(), 50);
        assert_eq!(
            t.get(&Value::Integer(10), &mut natural_compare).unwrap(),
            Some(Value::Integer(20))
        );
        assert_eq!(t.get(&Value::Integer(999), &mut natural_compare).unwrap(), None);
    }

    #[test]
    fn in_order_iteration_is_sorted_by_hash() {
        let t = Tree::new();
        for i in [5i64, 1, 4, 2, 3] {
            t.insert(Value::Integer(i), Value::Nil, &mut natural_compare).unwrap();
        }
        // hash_value(Integer) isn't numeric order, so just check every key
        // made it in exactly once rather than asserting a specific order.
        let keys: Vec<_> = t.iter().map(|(k, _)| k).collect();
        assert_eq!(keys.len(), 5);
    }
}
