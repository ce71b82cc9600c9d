//! Tagged-value runtime for the reagent reactive engine.
//!
//! This crate is the leaf of the workspace: it defines the `Value` type
//! every other crate passes around, plus the pieces that only need to
//! know about values themselves -- arithmetic-free containers (list,
//! tree, stringbuffer), hashing, multi-dispatch method resolution, type
//! tags, and error payloads. It deliberately knows nothing about syntax,
//! bytecode, the store, or the event loop; those depend on this crate,
//! never the other way around.

pub mod avl;
pub mod builtins;
pub mod error;
pub mod hash;
pub mod iterator;
pub mod list;
pub mod method;
pub mod stringbuffer;
pub mod tree;
pub mod typetag;
pub mod value;

pub use builtins::{builtin_functions, builtin_methods, display_value, error_field};
pub use error::{ErrorKind, ErrorPayload, Frame, MAX_TRACE};
pub use hash::hash_value;
pub use iterator::{IteratorHandle, ListIterator, PairIterator, RangeIterator, ValueIterator};
pub use list::List;
pub use method::{natural_compare, Arity, Method, MethodBody, MethodImpl, NativeFn, NativeFunction};
pub use stringbuffer::StringBuffer;
pub use tree::Tree;
pub use typetag::TypeTag;
pub use value::{Boxed, DynValue, Reference, Value};
