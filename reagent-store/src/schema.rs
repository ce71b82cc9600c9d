//! Schema definitions: the named relations instances belong to.
//!
//! A schema is built once, from the flat descriptor list the compiler
//! emits for a `schema ... end` block (see `reagent-compiler`'s
//! `compile_schema`), and lives for the remainder of the program --
//! schemas are never redefined or destroyed.

use arcstr::ArcStr;
use fxhash::FxHashMap;
use reagent_value::{ErrorKind, ErrorPayload, Value};
use std::cell::RefCell;
use std::rc::Rc;

use crate::index::IndexDef;
use crate::instance::InstanceData;
use crate::listener::ListenerDef;

/// How a field's value is produced when read.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Stored in the instance's slot array.
    Value { slot: u32, default: Option<Value> },
    /// Invoked with the instance as its sole argument; never memoized.
    Computed { closure: Value },
    /// Fixed at schema-definition time.
    Constant { value: Value },
    /// Resolves to the instance itself.
    SelfRef,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: ArcStr,
    pub kind: FieldKind,
}

pub struct SchemaDef {
    pub id: u32,
    pub name: ArcStr,
    pub parent: Option<Rc<SchemaDef>>,
    /// Inherited fields first (same order and slots as the parent), own
    /// fields appended -- this is what lets a child instance's slot array
    /// be read correctly through either schema's field list.
    pub fields: Vec<FieldDef>,
    pub field_index: FxHashMap<ArcStr, usize>,
    pub value_slots: u32,
    pub indices: RefCell<FxHashMap<Vec<ArcStr>, Rc<IndexDef>>>,
    pub instances: RefCell<Vec<Rc<InstanceData>>>,
    pub listeners: RefCell<Vec<Rc<RefCell<ListenerDef>>>>,
}

impl std::fmt::Debug for SchemaDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<schema {} (#{})>", self.name, self.id)
    }
}

impl SchemaDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.field_index.get(name).map(|&i| &self.fields[i])
    }

    /// True if `self` is `other` or a descendant of it -- used to walk
    /// "each ancestor schema in the chain" during propagation.
    pub fn ancestors(self: &Rc<Self>) -> Vec<Rc<SchemaDef>> {
        let mut chain = vec![self.clone()];
        let mut cur = self.parent.clone();
        while let Some(p) = cur {
            chain.push(p.clone());
            cur = p.parent.clone();
        }
        chain
    }

    /// Finds (or lazily creates) the index over `fields`, recursing up the
    /// parent chain first so every ancestor gets a same-keyed index too --
    /// this is what
    /// lets a lookup rooted at an ancestor schema still see a descendant's
    /// instances.
    pub fn get_or_create_index(self: &Rc<Self>, fields: &[ArcStr]) -> Rc<IndexDef> {
        if let Some(existing) = self.indices.borrow().get(fields) {
            return existing.clone();
        }
        let parent_idx = self.parent.as_ref().map(|p| p.get_or_create_index(fields));
        let idx = Rc::new(IndexDef::new(fields.to_vec(), parent_idx));
        self.indices.borrow_mut().insert(fields.to_vec(), idx.clone());
        idx
    }

    /// Every index currently registered directly on this schema (its own
    /// declared indices plus the parallel trees allocated for each parent
    /// index at schema-definition time). Ancestor-only indices are
    /// reached transitively through each entry's `parent` chain, so a
    /// mutation loop over just this list still keeps every ancestor index
    /// in sync.
    pub fn indices_vec(&self) -> Vec<Rc<IndexDef>> {
        self.indices.borrow().values().cloned().collect()
    }

    /// True if `field` participates in any index registered on this
    /// schema -- used to reject `update`s that would leave an index keyed
    /// by a stale value.
    pub fn is_indexed_field(&self, field: &str) -> bool {
        self.indices.borrow().keys().any(|fs| fs.iter().any(|f| f.as_str() == field))
    }

    pub fn field_error(field: &str) -> ErrorPayload {
        ErrorPayload::new(ErrorKind::FieldError, format!("no such field: {field}"))
    }

    pub fn schema_error(msg: impl Into<ArcStr>) -> ErrorPayload {
        ErrorPayload::new(ErrorKind::SchemaError, msg)
    }
}

/// Parses the flat descriptor list `compile_schema` builds:
/// `[name, parent_or_nil, field_count, (tag, name, body)*field_count,
/// index_count, (field_name_list)*index_count]`.
pub struct SchemaDescriptor {
    pub name: ArcStr,
    pub parent: Option<ArcStr>,
    pub field_triples: Vec<(ArcStr, ArcStr, Value)>,
    pub own_indices: Vec<Vec<ArcStr>>,
}

pub fn parse_schema_descriptor(descriptor: &Value) -> Result<SchemaDescriptor, ErrorPayload> {
    let list = match descriptor {
        Value::List(l) => l.to_vec(),
        other => return Err(internal(format!("schema descriptor must be a list, got {}", reagent_value::display_value(other)))),
    };
    let mut i = 0;
    let name = expect_string(&list, &mut i)?;
    let parent = match list.get(i).cloned() {
        Some(Value::Nil) => {
            i += 1;
            None
        }
        Some(Value::String(s)) => {
            i += 1;
            Some(s)
        }
        other => return Err(internal(format!("expected schema parent name or nil, got {other:?}"))),
    };
    let field_count = expect_int(&list, &mut i)?;
    let mut field_triples = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        let tag = expect_string(&list, &mut i)?;
        let name = expect_string(&list, &mut i)?;
        let body = list.get(i).cloned().ok_or_else(|| internal("schema descriptor truncated"))?;
        i += 1;
        field_triples.push((tag, name, body));
    }
    let index_count = expect_int(&list, &mut i)?;
    let mut own_indices = Vec::with_capacity(index_count as usize);
    for _ in 0..index_count {
        match list.get(i).cloned() {
            Some(Value::List(l)) => {
                i += 1;
                own_indices.push(
                    l.to_vec()
                        .into_iter()
                        .map(|v| match v {
                            Value::String(s) => Ok(s),
                            other => Err(internal(format!("expected field name string, got {other:?}"))),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                );
            }
            other => return Err(internal(format!("expected index field list, got {other:?}"))),
        }
    }
    Ok(SchemaDescriptor { name, parent, field_triples, own_indices })
}

fn expect_string(list: &[Value], i: &mut usize) -> Result<ArcStr, ErrorPayload> {
    match list.get(*i) {
        Some(Value::String(s)) => {
            *i += 1;
            Ok(s.clone())
        }
        other => Err(internal(format!("expected string, got {other:?}"))),
    }
}

fn expect_int(list: &[Value], i: &mut usize) -> Result<i64, ErrorPayload> {
    match list.get(*i) {
        Some(Value::Integer(n)) => {
            *i += 1;
            Ok(*n)
        }
        other => Err(internal(format!("expected integer, got {other:?}"))),
    }
}

fn internal(msg: impl Into<ArcStr>) -> ErrorPayload {
    ErrorPayload::new(ErrorKind::InternalError, msg)
}
