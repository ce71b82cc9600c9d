//! Compiled join plans: a listener's `ordered vector of per-schema steps`
//! plus the attach/propagate/fire machinery that
//! drives reactive rule execution.
//!
//! The step descriptor shape a `when`/`exists` form compiles to is fixed
//! by `reagent-compiler`'s `compile_join_step_descriptor`: a 6-element
//! list `[schema, negated, created_only, key_fields, key_closure_or_nil,
//! binds]`. Parsing that descriptor back into a [`StepPlan`] here is the
//! store-side mirror of that compiler function.

use arcstr::ArcStr;
use reagent_value::{ErrorKind, ErrorPayload, List, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::schema::SchemaDef;

/// One step of a compiled join plan. `key_fields` empty means a broad
/// (schema-wide) head or, for a non-head step, a step with no narrowing
/// key -- not currently produced by the compiler but not rejected here
/// either.
pub struct StepPlan {
    pub schema: Rc<SchemaDef>,
    pub negated: bool,
    pub created_only: bool,
    pub key_fields: Vec<ArcStr>,
    /// Takes every alias bound by prior (non-negated) steps, in order,
    /// and returns the key values to look this step up by. `None` for a
    /// broad head.
    pub key_closure: Option<Value>,
    /// `(alias, field)` pairs selecting which of the matched instance's
    /// fields become visible to later steps and the listener body.
    pub binds: Vec<(ArcStr, ArcStr)>,
}

/// A precompiled listener: the join plan plus the callback to invoke on
/// a successful match. Reachable from exactly one schema or instance
/// listener list at a time per step.
pub struct ListenerDef {
    pub steps: Vec<StepPlan>,
    pub callback: Value,
    /// The head's key values as computed at attach time, kept so a later
    /// ancestor-schema walk can test "does this newly inserted/updated
    /// instance match the ground key this listener is still waiting
    /// for" without re-invoking the key closure (which, for a head step,
    /// takes no arguments and so is safe to re-run, but caching it here
    /// also matches what attach time computed).
    pub ground_key: RefCell<Option<Vec<Value>>>,
}

impl fmt::Debug for ListenerDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<listener, {} steps>", self.steps.len())
    }
}

fn internal(msg: impl Into<ArcStr>) -> ErrorPayload {
    ErrorPayload::new(ErrorKind::InternalError, msg)
}

/// Parses one `[schema, negated, created_only, key_fields, key_closure,
/// binds]` descriptor list, resolving the schema name against `lookup`.
pub fn parse_step_descriptor(
    v: &Value,
    lookup: impl Fn(&str) -> Option<Rc<SchemaDef>>,
) -> Result<StepPlan, ErrorPayload> {
    let items = match v {
        Value::List(l) => l.to_vec(),
        other => return Err(internal(format!("expected join step descriptor list, got {other:?}"))),
    };
    if items.len() != 6 {
        return Err(internal(format!("join step descriptor has {} fields, expected 6", items.len())));
    }
    let schema_name = match &items[0] {
        Value::String(s) => s.clone(),
        other => return Err(internal(format!("expected schema name string, got {other:?}"))),
    };
    let schema = lookup(&schema_name)
        .ok_or_else(|| ErrorPayload::new(ErrorKind::NameError, format!("no such schema: {schema_name}")))?;
    let negated = truthy_int(&items[1])?;
    let created_only = truthy_int(&items[2])?;
    let key_fields = match &items[3] {
        Value::List(l) => l
            .to_vec()
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                other => Err(internal(format!("expected key field name, got {other:?}"))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => return Err(internal(format!("expected key field list, got {other:?}"))),
    };
    let key_closure = match &items[4] {
        Value::Nil => None,
        other => Some(other.clone()),
    };
    let binds_flat = match &items[5] {
        Value::List(l) => l.to_vec(),
        other => return Err(internal(format!("expected binds list, got {other:?}"))),
    };
    if binds_flat.len() % 2 != 0 {
        return Err(internal("binds list has odd length"));
    }
    let mut binds = Vec::with_capacity(binds_flat.len() / 2);
    for pair in binds_flat.chunks(2) {
        let alias = match &pair[0] {
            Value::String(s) => s.clone(),
            other => return Err(internal(format!("expected bind alias, got {other:?}"))),
        };
        let field = match &pair[1] {
            Value::String(s) => s.clone(),
            other => return Err(internal(format!("expected bind field, got {other:?}"))),
        };
        binds.push((alias, field));
    }
    Ok(StepPlan { schema, negated, created_only, key_fields, key_closure, binds })
}

fn truthy_int(v: &Value) -> Result<bool, ErrorPayload> {
    match v {
        Value::Integer(n) => Ok(*n != 0),
        other => Err(internal(format!("expected 0/1 flag, got {other:?}"))),
    }
}

pub fn key_list(values: &[Value]) -> Value {
    Value::List(List::from_iter(values.iter().cloned()))
}
