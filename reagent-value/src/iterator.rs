//! The `iterator` value type used by `for`/`next`/`exists` bytecode.
//!
//! Iterators are mutable objects (each `next` call advances state), so
//! unlike `List`/`Tree` they're modeled as a trait object behind a
//! `RefCell` rather than a value type of their own -- every built-in
//! source (list, tree, range) and every user-level `generator`-style
//! closure wrapper implements the same small trait.

use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Implemented by every iterator source. `next` returns `None` once
/// exhausted; after that every further call must keep returning `None`
/// (required by the `until`/`while`/`exists` instructions, which re-poll
/// after a listener wakes them).
pub trait ValueIterator: std::fmt::Debug {
    fn next(&mut self) -> Option<Value>;
}

pub type IteratorHandle = Rc<RefCell<dyn ValueIterator>>;

pub fn new_handle(it: impl ValueIterator + 'static) -> IteratorHandle {
    Rc::new(RefCell::new(it))
}

#[derive(Debug)]
pub struct ListIterator {
    items: Vec<Value>,
    pos: usize,
}

impl ListIterator {
    pub fn new(items: Vec<Value>) -> Self {
        ListIterator { items, pos: 0 }
    }
}

impl ValueIterator for ListIterator {
    fn next(&mut self) -> Option<Value> {
        let v = self.items.get(self.pos)?.clone();
        self.pos += 1;
        Some(v)
    }
}

#[derive(Debug)]
pub struct PairIterator {
    items: Vec<(Value, Value)>,
    pos: usize,
}

impl PairIterator {
    pub fn new(items: Vec<(Value, Value)>) -> Self {
        PairIterator { items, pos: 0 }
    }
}

impl ValueIterator for PairIterator {
    fn next(&mut self) -> Option<Value> {
        let (k, v) = self.items.get(self.pos)?.clone();
        self.pos += 1;
        Some(crate::value::Value::List(crate::list::List::from_iter([k, v])))
    }
}

/// Integer range, used by `for i in a..b`.
#[derive(Debug)]
pub struct RangeIterator {
    cur: i64,
    end: i64,
    step: i64,
}

impl RangeIterator {
    pub fn new(start: i64, end: i64, step: i64) -> Self {
        RangeIterator { cur: start, end, step }
    }
}

impl ValueIterator for RangeIterator {
    fn next(&mut self) -> Option<Value> {
        let done = if self.step >= 0 { self.cur >= self.end } else { self.cur <= self.end };
        if done {
            return None;
        }
        let v = self.cur;
        self.cur += self.step;
        Some(Value::Integer(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_iterator_respects_step_and_direction() {
        let mut it = RangeIterator::new(0, 10, 3);
        let mut out = vec![];
        while let Some(Value::Integer(i)) = it.next() {
            out.push(i);
        }
        assert_eq!(out, vec![0, 3, 6, 9]);
    }

    #[test]
    fn list_iterator_exhausts_and_stays_exhausted() {
        let mut it = ListIterator::new(vec![Value::Integer(1)]);
        assert_eq!(it.next(), Some(Value::Integer(1)));
        assert_eq!(it.next(), None);
        assert_eq!(it.next(), None);
    }
}
