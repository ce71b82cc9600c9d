//! The core tagged value type.
//!
//! `Closure`, `Instance`, `Schema`, `Index`, `Listener` and `Event` are
//! concrete types owned by other crates (`reagent-vm`, `reagent-store`)
//! that this crate cannot depend on without creating a cycle (`reagent-vm`
//! needs `Value` to build its stack; `reagent-store` needs `Value` to
//! hold field contents). Each is instead carried as a [`Boxed`] --
//! an `Rc<dyn Any + Debug>` -- and downcast back to its concrete type at
//! the point of use by the crate that defined it. This is the same shape
//! as the `Any`-keyed bag of library state threaded through the
//! compiler/runtime boundary elsewhere in this codebase, just narrowed to
//! a single trait object per value instead of a whole map.

use crate::error::ErrorPayload;
use crate::iterator::IteratorHandle;
use crate::list::List;
use crate::method::{Method, NativeFunction};
use crate::stringbuffer::StringBuffer;
use crate::tree::Tree;
use crate::typetag::TypeTag;
use arcstr::ArcStr;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub trait DynValue: Any + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug> DynValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An opaque handle to a value owned by another crate. Cheap to clone
/// (bumps an `Rc`); `downcast_ref` is how the owning crate gets its
/// concrete type back.
#[derive(Clone)]
pub struct Boxed(pub Rc<dyn DynValue>);

impl Boxed {
    pub fn new<T: Any + fmt::Debug>(v: T) -> Self {
        Boxed(Rc::new(v))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Boxed) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Boxed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

/// A mutable cell, the backing store for `var`/`local` slots that are
/// closed over and for the host language's explicit `reference` type.
pub type Reference = Rc<RefCell<Value>>;

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Some(Box<Value>),
    Integer(i64),
    Real(f64),
    String(ArcStr),
    List(List),
    Tree(Tree),
    Reference(Reference),
    Method(Rc<Method>),
    Function(Rc<NativeFunction>),
    /// A compiled bytecode closure, owned by `reagent-vm`.
    Closure(Boxed),
    Error(Rc<ErrorPayload>),
    StringBuffer(Rc<RefCell<StringBuffer>>),
    Iterator(IteratorHandle),
    /// A row in the relational store, owned by `reagent-store`. The
    /// `u32` is the defining schema's id, carried alongside the opaque
    /// handle so `type_tag` can report `Instance(id)` without a downcast.
    Instance(Boxed, u32),
    Schema(Boxed),
    Index(Boxed),
    Listener(Boxed),
    Event(Boxed),
}

impl Value {
    pub fn some(v: Value) -> Value {
        match v {
            Value::Nil => Value::Nil,
            other => Value::Some(Box::new(other)),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil)
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Nil => TypeTag::Nil,
            Value::Some(_) => TypeTag::Some,
            Value::Integer(_) => TypeTag::Integer,
            Value::Real(_) => TypeTag::Real,
            Value::String(_) => TypeTag::String,
            Value::List(_) => TypeTag::List,
            Value::Tree(_) => TypeTag::Tree,
            Value::Reference(_) => TypeTag::Reference,
            Value::Method(_) => TypeTag::Method,
            Value::Function(_) => TypeTag::Function,
            Value::Closure(_) => TypeTag::Closure,
            Value::Error(_) => TypeTag::Error,
            Value::StringBuffer(_) => TypeTag::StringBuffer,
            Value::Iterator(_) => TypeTag::Iterator,
            Value::Instance(_, schema_id) => TypeTag::Instance(*schema_id),
            Value::Schema(_) => TypeTag::Schema,
            Value::Index(_) => TypeTag::Index,
            Value::Listener(_) => TypeTag::Listener,
            Value::Event(_) => TypeTag::Event,
        }
    }
}

impl PartialEq for Value {
    /// Structural equality for scalars, reference identity for every
    /// reference-like variant (lists, trees, closures, instances, ...).
    /// This matches `hash_value`'s treatment: two lists that merely
    /// contain equal elements hash alike (so they land in the same AVL
    /// bucket) but are only `==` if they're the same list, same as the
    /// host language's `is` vs structural `?`.
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Some(a), Some(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Real(a), Real(b)) => a == b,
            (String(a), String(b)) => a == b,
            (List(a), List(b)) => a.ptr_eq(b),
            (Tree(a), Tree(b)) => a.ptr_eq(b),
            (Reference(a), Reference(b)) => Rc::ptr_eq(a, b),
            (Method(a), Method(b)) => Rc::ptr_eq(a, b),
            (Function(a), Function(b)) => Rc::ptr_eq(a, b),
            (Closure(a), Closure(b)) => a.ptr_eq(b),
            (Error(a), Error(b)) => Rc::ptr_eq(a, b),
            (StringBuffer(a), StringBuffer(b)) => Rc::ptr_eq(a, b),
            (Iterator(a), Iterator(b)) => Rc::ptr_eq(a, b),
            (Instance(a, _), Instance(b, _)) => a.ptr_eq(b),
            (Schema(a), Schema(b)) => a.ptr_eq(b),
            (Index(a), Index(b)) => a.ptr_eq(b),
            (Listener(a), Listener(b)) => a.ptr_eq(b),
            (Event(a), Event(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn some_of_nil_collapses_to_nil() {
        assert_eq!(Value::some(Value::Nil), Value::Nil);
    }

    #[test]
    fn lists_are_equal_only_by_identity() {
        let a = List::from_iter([Value::Integer(1)]);
        let b = List::from_iter([Value::Integer(1)]);
        assert_ne!(Value::List(a.clone()), Value::List(b));
        assert_eq!(Value::List(a.clone()), Value::List(a));
    }

    #[test]
    fn boxed_roundtrips_through_any() {
        #[derive(Debug)]
        struct Marker(u32);
        let b = Boxed::new(Marker(7));
        assert_eq!(b.downcast_ref::<Marker>().unwrap().0, 7);
    }
}
