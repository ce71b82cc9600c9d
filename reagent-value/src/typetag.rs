use smallvec::SmallVec;

/// A stable, small identifier for every value type the runtime knows
/// about. Dispatch walks `parent()` chains rather than a hand-rolled
/// vtable pointer, so the chain itself is precomputed on demand into a
/// `SmallVec` that almost never spills (see `ancestors`).
///
/// `Instance(schema)` carries the defining schema's id so that method
/// dispatch and listener attachment can be specific to a schema while
/// still falling back to the `Instance` and `Any` ancestors for generic
/// handling (printing, equality, etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Any,
    Nil,
    Some,
    Number,
    Integer,
    Real,
    String,
    StringBuffer,
    List,
    Tree,
    Reference,
    Callable,
    Method,
    Function,
    Closure,
    Error,
    ErrorValue,
    Iterator,
    Instance(u32),
    Schema,
    Index,
    Listener,
    Event,
}

impl TypeTag {
    /// The immediate parent in the type DAG, or `None` at the root.
    pub fn parent(self) -> Option<TypeTag> {
        use TypeTag::*;
        match self {
            Any => None,
            Number => Some(Any),
            Integer | Real => Some(Number),
            Callable => Some(Any),
            Method | Function | Closure => Some(Callable),
            Error | ErrorValue => Some(Any),
            Instance(_) => Some(Any),
            Nil | Some | String | StringBuffer | List | Tree | Reference | Iterator
            | Schema | Index | Listener | Event => Some(Any),
        }
    }

    /// This type and every ancestor, most specific first, terminating at
    /// `Any`. Four entries covers every built-in chain without spilling
    /// (`Integer -> Number -> Any` is the longest at three); instances
    /// with a schema parent chain may spill for deep inheritance, which
    /// is the uncommon case.
    pub fn ancestors(self) -> SmallVec<[TypeTag; 4]> {
        let mut v = SmallVec::new();
        let mut cur = Some(self);
        while let Some(t) = cur {
            v.push(t);
            cur = t.parent();
        }
        v
    }

    /// True if `self` is `other` or a descendant of `other` in the type DAG.
    pub fn is_a(self, other: TypeTag) -> bool {
        self.ancestors().into_iter().any(|t| t == other)
    }

    pub fn name(self) -> &'static str {
        use TypeTag::*;
        match self {
            Any => "any",
            Nil => "nil",
            Some => "some",
            Number => "number",
            Integer => "integer",
            Real => "real",
            String => "string",
            StringBuffer => "stringbuffer",
            List => "list",
            Tree => "tree",
            Reference => "reference",
            Callable => "callable",
            Method => "method",
            Function => "function",
            Closure => "closure",
            Error => "error",
            ErrorValue => "errorvalue",
            Iterator => "iterator",
            Instance(_) => "instance",
            Schema => "schema",
            Index => "index",
            Listener => "listener",
            Event => "event",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_ancestors() {
        let a = TypeTag::Integer.ancestors();
        assert_eq!(&a[..], &[TypeTag::Integer, TypeTag::Number, TypeTag::Any]);
    }

    #[test]
    fn is_a_through_number() {
        assert!(TypeTag::Integer.is_a(TypeTag::Number));
        assert!(TypeTag::Real.is_a(TypeTag::Any));
        assert!(!TypeTag::Real.is_a(TypeTag::Integer));
    }

    #[test]
    fn instance_chains_to_any_not_to_other_instances() {
        assert!(TypeTag::Instance(3).is_a(TypeTag::Any));
        assert!(!TypeTag::Instance(3).is_a(TypeTag::Instance(4)));
    }
}
