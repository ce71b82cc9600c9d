//! Multi-dispatch methods and native functions.
//!
//! A [`Method`] is the runtime value behind a generic function: a name
//! plus a set of [`MethodImpl`]s, each guarding a tuple of parameter
//! [`TypeTag`]s. Resolving a call walks every registered impl, keeps the
//! ones whose parameter types are ancestors of the actual argument
//! types, and picks the most specific match -- this is the "discrimination
//! trie on parameter type chains" collapsed into a linear scan plus a
//! specificity score, which is simpler to get right than a literal trie
//! and gives identical answers since the ancestor chains here are short.

use crate::error::{ErrorKind, ErrorPayload};
use crate::typetag::TypeTag;
use crate::value::Value;
use arcstr::ArcStr;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value, ErrorPayload>>;

#[derive(Clone)]
pub enum MethodBody {
    /// Implemented directly in Rust.
    Native(NativeFn),
    /// Implemented by a compiled closure; invoking it is the VM's job, so
    /// this crate only ever stores and returns it opaquely.
    Closure(Value),
}

#[derive(Clone)]
pub struct MethodImpl {
    pub params: SmallVec<[TypeTag; 4]>,
    /// When set, the last entry in `params` matches every trailing
    /// argument, not just one -- e.g. `(Any, Any...)` for a 2+ arg method.
    pub variadic: bool,
    pub body: MethodBody,
}

impl MethodImpl {
    fn applies_to(&self, arg_types: &[TypeTag]) -> bool {
        if self.variadic {
            if arg_types.len() + 1 < self.params.len() {
                return false;
            }
        } else if arg_types.len() != self.params.len() {
            return false;
        }
        for (i, arg_ty) in arg_types.iter().enumerate() {
            let param_ty = if self.variadic && i >= self.params.len() - 1 {
                *self.params.last().unwrap()
            } else {
                self.params[i]
            };
            if !arg_ty.is_a(param_ty) {
                return false;
            }
        }
        true
    }

    /// Lower score is more specific: the sum, over every parameter, of how
    /// many steps up the ancestor chain the declared type sits above the
    /// actual argument type.
    fn specificity(&self, arg_types: &[TypeTag]) -> u32 {
        let mut score = 0u32;
        for (i, arg_ty) in arg_types.iter().enumerate() {
            let param_ty = if self.variadic && i >= self.params.len() - 1 {
                *self.params.last().unwrap()
            } else {
                self.params[i]
            };
            let distance = arg_ty
                .ancestors()
                .into_iter()
                .position(|t| t == param_ty)
                .unwrap_or(0) as u32;
            score += distance;
        }
        score
    }
}

pub struct Method {
    pub name: ArcStr,
    impls: RefCell<Vec<MethodImpl>>,
}

impl Method {
    pub fn new(name: impl Into<ArcStr>) -> Self {
        Method { name: name.into(), impls: RefCell::new(Vec::new()) }
    }

    pub fn define(&self, params: SmallVec<[TypeTag; 4]>, variadic: bool, body: MethodBody) {
        self.impls.borrow_mut().push(MethodImpl { params, variadic, body });
    }

    /// Picks the single most specific applicable implementation. Ties are
    /// broken by registration order (first wins), matching the order in
    /// which built-ins are installed followed by user redefinitions.
    pub fn resolve(&self, arg_types: &[TypeTag]) -> Option<MethodImpl> {
        self.impls
            .borrow()
            .iter()
            .filter(|m| m.applies_to(arg_types))
            .min_by_key(|m| m.specificity(arg_types))
            .cloned()
    }

    pub fn arg_error(&self, arg_types: &[TypeTag]) -> ErrorPayload {
        let names: Vec<&'static str> = arg_types.iter().map(|t| t.name()).collect();
        ErrorPayload::no_matching_method(&self.name, &names)
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<method {} ({} impls)>", self.name, self.impls.borrow().len())
    }
}

#[derive(Clone, Copy)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
        }
    }
}

/// A plain native function, as opposed to a dispatched [`Method`]: used
/// for builtins like `print` or `len` that don't need multiple dispatch.
pub struct NativeFunction {
    pub name: ArcStr,
    pub arity: Arity,
    pub body: NativeFn,
}

impl NativeFunction {
    pub fn new(name: impl Into<ArcStr>, arity: Arity, body: NativeFn) -> Self {
        NativeFunction { name: name.into(), arity, body }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, ErrorPayload> {
        if !self.arity.accepts(args.len()) {
            return Err(ErrorPayload::new(
                ErrorKind::ParamError,
                format!("{} takes the wrong number of arguments", self.name),
            ));
        }
        (self.body)(args)
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

/// The default total order used to break hash ties in trees and indices
/// when no user `?` method applies. Same-variant values compare
/// structurally; different variants fall back to a fixed order over
/// `TypeTag` discriminants so that any two values are still comparable
/// (required for the AVL invariant), at the cost of that cross-type order
/// being arbitrary rather than meaningful.
pub fn natural_compare(a: &Value, b: &Value) -> Result<Ordering, ErrorPayload> {
    use Value::*;
    match (a, b) {
        (Nil, Nil) => Ok(Ordering::Equal),
        (Integer(x), Integer(y)) => Ok(x.cmp(y)),
        (Real(x), Real(y)) => x.partial_cmp(y).ok_or_else(nan_error),
        (Integer(x), Real(y)) => (*x as f64).partial_cmp(y).ok_or_else(nan_error),
        (Real(x), Integer(y)) => x.partial_cmp(&(*y as f64)).ok_or_else(nan_error),
        (String(x), String(y)) => Ok(x.as_str().cmp(y.as_str())),
        (Some(x), Some(y)) => natural_compare(x, y),
        (Reference(x), Reference(y)) => Ok((x.as_ptr() as usize).cmp(&(y.as_ptr() as usize))),
        (List(x), List(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                match natural_compare(&xi, &yi)? {
                    Ordering::Equal => continue,
                    o => return Ok(o),
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ if std::mem::discriminant(a) == std::mem::discriminant(b) => {
            Ok(crate::hash::hash_value(a).cmp(&crate::hash::hash_value(b)))
        }
        _ => Ok(tag_rank(a).cmp(&tag_rank(b))),
    }
}

fn nan_error() -> ErrorPayload {
    ErrorPayload::new(ErrorKind::CompareError, "cannot order NaN")
}

fn tag_rank(v: &Value) -> u32 {
    use Value::*;
    match v {
        Nil => 0,
        Some(_) => 1,
        Integer(_) => 2,
        Real(_) => 3,
        String(_) => 4,
        List(_) => 5,
        Tree(_) => 6,
        Reference(_) => 7,
        Method(_) => 8,
        Function(_) => 9,
        Closure(_) => 10,
        Error(_) => 11,
        StringBuffer(_) => 12,
        Iterator(_) => 13,
        Instance(_, _) => 14,
        Schema(_) => 15,
        Index(_) => 16,
        Listener(_) => 17,
        Event(_) => 18,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imp(params: &[TypeTag]) -> MethodImpl {
        MethodImpl {
            params: params.iter().copied().collect(),
            variadic: false,
            body: MethodBody::Native(Rc::new(|_| Ok(Value::Nil))),
        }
    }

    #[test]
    fn resolve_picks_most_specific() {
        let m = Method::new("add");
        m.impls.borrow_mut().push(imp(&[TypeTag::Any, TypeTag::Any]));
        m.impls.borrow_mut().push(imp(&[TypeTag::Integer, TypeTag::Integer]));
        let r = m.resolve(&[TypeTag::Integer, TypeTag::Integer]).unwrap();
        assert_eq!(r.params[0], TypeTag::Integer);
    }

    #[test]
    fn resolve_none_when_nothing_applies() {
        let m = Method::new("add");
        m.impls.borrow_mut().push(imp(&[TypeTag::Integer]));
        assert!(m.resolve(&[TypeTag::String]).is_none());
    }
}
