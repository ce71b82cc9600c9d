//! Deterministic value hashing for trees and indices.
//!
//! This is a fast non-cryptographic hash (the same `fxhash` family used
//! for every in-memory hash map in this workspace) -- it only needs to
//! place keys into AVL buckets consistently with `==`/`?`, never to
//! resist adversarial input, so reaching for `FxHasher` instead of
//! something like SipHash is the right tradeoff.

use crate::value::Value;
use fxhash::FxHasher64;
use std::hash::{Hash, Hasher};

pub fn hash_value(v: &Value) -> u64 {
    let mut h = FxHasher64::default();
    hash_into(v, &mut h);
    h.finish()
}

fn hash_into(v: &Value, h: &mut FxHasher64) {
    std::mem::discriminant(v).hash(h);
    match v {
        Value::Nil => {}
        Value::Some(v) => hash_into(v, h),
        Value::Integer(i) => i.hash(h),
        // Real numbers hash via their bit pattern so that hash agrees with
        // the `?` total order used to break ties, NaN included.
        Value::Real(r) => r.to_bits().hash(h),
        Value::String(s) => s.as_bytes().hash(h),
        Value::List(l) => {
            for item in l.iter() {
                hash_into(&item, h);
            }
        }
        Value::Tree(t) => {
            for (k, v) in t.iter() {
                hash_into(&k, h);
                hash_into(&v, h);
            }
        }
        // Reference identity, not content: two references are the same
        // key iff they are literally the same cell.
        Value::Reference(r) => (r.as_ptr() as usize).hash(h),
        Value::Method(m) => (std::rc::Rc::as_ptr(m) as *const () as usize).hash(h),
        Value::Function(f) => (std::rc::Rc::as_ptr(f) as *const () as usize).hash(h),
        Value::Closure(c) => (std::rc::Rc::as_ptr(c) as *const () as usize).hash(h),
        Value::Error(e) => (std::rc::Rc::as_ptr(e) as *const () as usize).hash(h),
        Value::StringBuffer(b) => (std::rc::Rc::as_ptr(b) as *const () as usize).hash(h),
        Value::Iterator(i) => (std::rc::Rc::as_ptr(i) as *const () as usize).hash(h),
        Value::Instance(o, schema_id) => {
            (std::rc::Rc::as_ptr(&o.0) as *const () as usize).hash(h);
            schema_id.hash(h);
        }
        Value::Schema(o) | Value::Index(o) | Value::Listener(o) | Value::Event(o) => {
            (std::rc::Rc::as_ptr(&o.0) as *const () as usize).hash(h)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::natural_compare;

    proptest::proptest! {
        /// Two integers (or two strings) that `?` reports as equal must
        /// also hash equal -- the AVL tie-break on a hash collision assumes
        /// this, and indices would silently fragment equal keys into
        /// different buckets otherwise.
        #[test]
        fn equal_integers_hash_equal(a: i64, b: i64) {
            let (x, y) = (Value::Integer(a), Value::Integer(b));
            if natural_compare(&x, &y).unwrap() == std::cmp::Ordering::Equal {
                proptest::prop_assert_eq!(hash_value(&x), hash_value(&y));
            }
        }

        #[test]
        fn equal_strings_hash_equal(a in ".*", b in ".*") {
            let (x, y) = (Value::String(a.clone().into()), Value::String(b.clone().into()));
            if natural_compare(&x, &y).unwrap() == std::cmp::Ordering::Equal {
                proptest::prop_assert_eq!(hash_value(&x), hash_value(&y));
            }
        }
    }
}
