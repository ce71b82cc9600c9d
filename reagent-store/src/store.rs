//! The relational store: schema registry, instance lifecycle
//! (`insert`/`signal`/`update`/`delete`) and the listener propagation
//! that drives reactive rule firing.
//!
//! `Store` implements [`reagent_vm::StoreHooks`], the seam the compiler's
//! relational surface forms (`schema`/`insert`/`signal`/`update`/
//! `delete`/`exists`/`when`) are lowered to `ConstCall`s against.

use arcstr::ArcStr;
use fxhash::FxHashMap;
use reagent_value::{Boxed, ErrorKind, ErrorPayload, List, Value};
use reagent_vm::{call_value, Globals, StoreHooks};
use std::cell::RefCell;
use std::rc::Rc;

use crate::index::IndexDef;
use crate::instance::InstanceData;
use crate::listener::{self, ListenerDef, StepPlan};
use crate::schema::{parse_schema_descriptor, FieldDef, FieldKind, SchemaDef};

fn internal(msg: impl Into<ArcStr>) -> ErrorPayload {
    ErrorPayload::new(ErrorKind::InternalError, msg)
}

fn schema_error(msg: impl Into<ArcStr>) -> ErrorPayload {
    ErrorPayload::new(ErrorKind::SchemaError, msg)
}

/// Whether a mutation is an `insert` (a genuinely new row), an `update`
/// (same row, rewritten fields) or a `delete`. Controls which listener
/// heads are eligible to fire (`Created` heads skip updates,
/// `Negated` heads only fire on delete).
#[derive(Clone, Copy, PartialEq, Eq)]
enum Event {
    Insert,
    Update,
    Delete,
}

pub struct Store {
    schemas: RefCell<FxHashMap<ArcStr, Rc<SchemaDef>>>,
    next_schema_id: RefCell<u32>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store { schemas: RefCell::new(FxHashMap::default()), next_schema_id: RefCell::new(0) }
    }

    fn lookup_schema(&self, name: &str) -> Option<Rc<SchemaDef>> {
        self.schemas.borrow().get(name).cloned()
    }

    fn require_schema(&self, name: &str) -> Result<Rc<SchemaDef>, ErrorPayload> {
        self.lookup_schema(name)
            .ok_or_else(|| ErrorPayload::new(ErrorKind::NameError, format!("no such schema: {name}")))
    }

    /// `insert`/`signal`/`update`/`delete` compile down to the schema's
    /// bare name (a `Value::String`); a `Value::Schema` handle is
    /// accepted too for callers that already hold one.
    fn resolve_schema(&self, v: &Value) -> Result<Rc<SchemaDef>, ErrorPayload> {
        match v {
            Value::String(s) => self.require_schema(s),
            Value::Schema(b) => b
                .downcast_ref::<Rc<SchemaDef>>()
                .cloned()
                .ok_or_else(|| internal("Value::Schema did not wrap a reagent-store SchemaDef")),
            other => Err(internal(format!("expected a schema name, got {other:?}"))),
        }
    }

    fn instance_of(v: &Value) -> Result<Rc<InstanceData>, ErrorPayload> {
        match v {
            Value::Instance(b, _) => b
                .downcast_ref::<Rc<InstanceData>>()
                .cloned()
                .ok_or_else(|| internal("Value::Instance did not wrap a reagent-store InstanceData")),
            other => Err(internal(format!("expected an instance value, got {other:?}"))),
        }
    }

    fn instance_value(inst: &Rc<InstanceData>) -> Value {
        Value::Instance(Boxed::new(inst.clone()), inst.schema.id)
    }

    /// Parses the `[[name, value], ...]` shape `ra_fields` builds for
    /// `insert`/`update`'s field list and `update`/`delete`'s key list.
    fn parse_pairs(v: &Value) -> Result<Vec<(ArcStr, Value)>, ErrorPayload> {
        let list = match v {
            Value::List(l) => l.to_vec(),
            other => return Err(internal(format!("expected field pair list, got {other:?}"))),
        };
        list.into_iter()
            .map(|pair| match pair {
                Value::List(l) if l.len() == 2 => {
                    let name = match l.get(0) {
                        Some(Value::String(s)) => s,
                        other => return Err(internal(format!("expected field name string, got {other:?}"))),
                    };
                    let value = l.get(1).unwrap_or(Value::Nil);
                    Ok((name, value))
                }
                other => Err(internal(format!("expected (name, value) pair, got {other:?}"))),
            })
            .collect()
    }

    /// Reads a named field's current value off a live instance,
    /// dispatching on its kind.
    fn resolve_field(instance: &Rc<InstanceData>, name: &str, globals: &mut Globals) -> Result<Value, ErrorPayload> {
        let field = instance.schema.field(name).ok_or_else(|| SchemaDef::field_error(name))?;
        match &field.kind {
            FieldKind::Value { slot, .. } => Ok(instance.slot(*slot)),
            FieldKind::Constant { value } => Ok(value.clone()),
            FieldKind::SelfRef => Ok(Self::instance_value(instance)),
            FieldKind::Computed { closure } => call_value(closure, &[Self::instance_value(instance)], globals),
        }
    }

    fn key_values(instance: &Rc<InstanceData>, fields: &[ArcStr], globals: &mut Globals) -> Result<Vec<Value>, ErrorPayload> {
        fields.iter().map(|f| Self::resolve_field(instance, f, globals)).collect()
    }

    /// Builds a fresh slot array: defaults for every `Value` field not
    /// named in `provided`, the provided value otherwise. Writing a
    /// non-`Value` field is a `SchemaError`.
    fn build_slots(
        schema: &Rc<SchemaDef>,
        provided: &[(ArcStr, Value)],
        globals: &mut Globals,
    ) -> Result<Vec<Value>, ErrorPayload> {
        let mut slots = vec![Value::Nil; schema.value_slots as usize];
        for field in &schema.fields {
            if let FieldKind::Value { slot, default } = &field.kind {
                if let Some(d) = default {
                    slots[*slot as usize] = call_value(d, &[], globals)?;
                }
            }
        }
        for (name, value) in provided {
            let field = schema.field(name).ok_or_else(|| SchemaDef::field_error(name))?;
            match &field.kind {
                FieldKind::Value { slot, .. } => slots[*slot as usize] = value.clone(),
                _ => return Err(schema_error(format!("cannot write non-value field: {name}"))),
            }
        }
        Ok(slots)
    }

    fn index_for(schema: &Rc<SchemaDef>, fields: &[ArcStr]) -> Rc<IndexDef> {
        schema.get_or_create_index(fields)
    }

    fn insert_into_indices(schema: &Rc<SchemaDef>, instance: &Rc<InstanceData>, globals: &mut Globals) -> Result<(), ErrorPayload> {
        let value = Self::instance_value(instance);
        for idx in schema.indices_vec() {
            let key_vals = Self::key_values(instance, &idx.fields, globals)?;
            idx.insert_chain(&listener::key_list(&key_vals), &value)?;
        }
        Ok(())
    }

    fn remove_from_indices(schema: &Rc<SchemaDef>, instance: &Rc<InstanceData>, globals: &mut Globals) -> Result<(), ErrorPayload> {
        for idx in schema.indices_vec() {
            let key_vals = Self::key_values(instance, &idx.fields, globals)?;
            idx.remove_chain(&listener::key_list(&key_vals))?;
        }
        Ok(())
    }

    /// Propagates an insert/update/signal of `instance` through the
    /// listener network. `allow_migration` is false for `signal`, whose
    /// transient instance must never become the anchor of a migrated
    /// narrow listener.
    fn propagate(
        &self,
        schema: &Rc<SchemaDef>,
        instance: &Rc<InstanceData>,
        event: Event,
        allow_migration: bool,
        globals: &mut Globals,
    ) -> Result<(), ErrorPayload> {
        let wants_negated = event == Event::Delete;

        // Step 1: listeners already resident on this instance.
        let resident: Vec<Rc<RefCell<ListenerDef>>> = instance.listeners.borrow().clone();
        for l in &resident {
            let head_negated = l.borrow().steps[0].negated;
            let head_created = l.borrow().steps[0].created_only;
            if head_negated != wants_negated {
                continue;
            }
            if event == Event::Update && head_created {
                continue;
            }
            Self::fire(l, instance, globals)?;
        }

        // Step 2: ancestor schema lists (including `schema` itself).
        for anc in schema.ancestors() {
            let candidates: Vec<Rc<RefCell<ListenerDef>>> = anc.listeners.borrow().clone();
            for l in candidates {
                let (head_negated, head_created, key_fields_empty) = {
                    let b = l.borrow();
                    (b.steps[0].negated, b.steps[0].created_only, b.steps[0].key_fields.is_empty())
                };
                if head_negated != wants_negated {
                    continue;
                }
                if event == Event::Update && head_created {
                    continue;
                }
                if key_fields_empty {
                    Self::fire(&l, instance, globals)?;
                    continue;
                }
                let key_fields = l.borrow().steps[0].key_fields.clone();
                let current = Self::key_values(instance, &key_fields, globals)?;
                let matches = {
                    let ground = l.borrow().ground_key.borrow().clone();
                    match ground {
                        Some(g) => keys_equal(&g, &current)?,
                        None => false,
                    }
                };
                if !matches {
                    continue;
                }
                if allow_migration {
                    anc.listeners.borrow_mut().retain(|o| !Rc::ptr_eq(o, &l));
                    instance.listeners.borrow_mut().push(l.clone());
                }
                Self::fire(&l, instance, globals)?;
            }
        }
        Ok(())
    }

    /// Walks a listener's join plan tail starting from the already-bound
    /// head fields, and enqueues its callback if every step matches.
    fn fire(listener: &Rc<RefCell<ListenerDef>>, head_instance: &Rc<InstanceData>, globals: &mut Globals) -> Result<(), ErrorPayload> {
        let (head_binds, callback, tail_len) = {
            let l = listener.borrow();
            (l.steps[0].binds.clone(), l.callback.clone(), l.steps.len())
        };
        let mut bound = Vec::new();
        for (_, field) in &head_binds {
            bound.push(Self::resolve_field(head_instance, field, globals)?);
        }
        for i in 1..tail_len {
            let (negated, key_fields, key_closure, binds, step_schema) = {
                let l = listener.borrow();
                let s = &l.steps[i];
                (s.negated, s.key_fields.clone(), s.key_closure.clone(), s.binds.clone(), s.schema.clone())
            };
            let key_vals = match &key_closure {
                Some(closure) => match call_value(closure, &bound, globals)? {
                    Value::List(l) => l.to_vec(),
                    other => return Err(internal(format!("join step key closure must return a list, got {other:?}"))),
                },
                None => Vec::new(),
            };
            let idx = Self::index_for(&step_schema, &key_fields);
            let found = idx.get(&listener::key_list(&key_vals))?;
            match (negated, found) {
                (false, Some(inst_val)) => {
                    let inst = Self::instance_of(&inst_val)?;
                    for (_, field) in &binds {
                        bound.push(Self::resolve_field(&inst, field, globals)?);
                    }
                }
                (true, None) => {}
                _ => return Ok(()),
            }
        }
        let sink = globals
            .action_sink()
            .ok_or_else(|| ErrorPayload::new(ErrorKind::InternalError, "no action sink installed for this runtime"))?;
        sink.borrow_mut().enqueue(callback, bound);
        Ok(())
    }

    /// Attaches a freshly built listener to its head: a broad head joins
    /// the schema's listener list directly, a narrow head resolves its
    /// ground key and migrates onto a matching instance if one exists
    /// yet, waiting on the schema list otherwise.
    fn attach(&self, listener: Rc<RefCell<ListenerDef>>, globals: &mut Globals) -> Result<(), ErrorPayload> {
        let (head_schema, key_fields, key_closure) = {
            let l = listener.borrow();
            (l.steps[0].schema.clone(), l.steps[0].key_fields.clone(), l.steps[0].key_closure.clone())
        };
        if key_fields.is_empty() {
            head_schema.listeners.borrow_mut().push(listener);
            return Ok(());
        }
        let key_vals = match &key_closure {
            Some(closure) => match call_value(closure, &[], globals)? {
                Value::List(l) => l.to_vec(),
                other => return Err(internal(format!("head key closure must return a list, got {other:?}"))),
            },
            None => return Err(internal("narrow head has no key closure")),
        };
        *listener.borrow().ground_key.borrow_mut() = Some(key_vals.clone());
        let idx = Self::index_for(&head_schema, &key_fields);
        match idx.get(&listener::key_list(&key_vals))? {
            Some(inst_val) => {
                let inst = Self::instance_of(&inst_val)?;
                inst.listeners.borrow_mut().push(listener);
            }
            None => {
                head_schema.listeners.borrow_mut().push(listener);
            }
        }
        Ok(())
    }

    fn find_by_keys(&self, schema: &Rc<SchemaDef>, keys: &[(ArcStr, Value)]) -> Result<Rc<InstanceData>, ErrorPayload> {
        let fields: Vec<ArcStr> = keys.iter().map(|(n, _)| n.clone()).collect();
        let values: Vec<Value> = keys.iter().map(|(_, v)| v.clone()).collect();
        let idx = Self::index_for(schema, &fields);
        match idx.get(&listener::key_list(&values))? {
            Some(v) => Self::instance_of(&v),
            None => Err(schema_error(format!("no {} instance matching the given keys", schema.name))),
        }
    }
}

fn keys_equal(a: &[Value], b: &[Value]) -> Result<bool, ErrorPayload> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b.iter()) {
        if reagent_value::natural_compare(x, y)? != std::cmp::Ordering::Equal {
            return Ok(false);
        }
    }
    Ok(true)
}

impl StoreHooks for Store {
    fn define_schema(&mut self, descriptor: &Value, _globals: &mut Globals) -> Result<Value, ErrorPayload> {
        let desc = parse_schema_descriptor(descriptor)?;
        let parent = match &desc.parent {
            Some(name) => Some(self.require_schema(name)?),
            None => None,
        };

        let mut fields: Vec<FieldDef> = parent.as_ref().map(|p| p.fields.clone()).unwrap_or_default();
        let mut value_slots = parent.as_ref().map(|p| p.value_slots).unwrap_or(0);

        for (tag, name, body) in &desc.field_triples {
            let kind = match tag.as_str() {
                "value" => {
                    let default = match body {
                        Value::Nil => None,
                        other => Some(other.clone()),
                    };
                    let slot = value_slots;
                    value_slots += 1;
                    FieldKind::Value { slot, default }
                }
                "constant" => FieldKind::Constant { value: body.clone() },
                "computed" => FieldKind::Computed { closure: body.clone() },
                "instance" => FieldKind::SelfRef,
                other => return Err(internal(format!("unknown field tag: {other}"))),
            };
            fields.push(FieldDef { name: name.clone(), kind });
        }

        // Index creation with an unknown field name auto-creates a fresh
        // value field.
        for idx_fields in &desc.own_indices {
            for f in idx_fields {
                if !fields.iter().any(|fd| &fd.name == f) {
                    let slot = value_slots;
                    value_slots += 1;
                    fields.push(FieldDef { name: f.clone(), kind: FieldKind::Value { slot, default: None } });
                }
            }
        }

        let field_index = fields.iter().enumerate().map(|(i, f)| (f.name.clone(), i)).collect();

        let id = {
            let mut n = self.next_schema_id.borrow_mut();
            let id = *n;
            *n += 1;
            id
        };
        let schema = Rc::new(SchemaDef {
            id,
            name: desc.name.clone(),
            parent: parent.clone(),
            fields,
            field_index,
            value_slots,
            indices: RefCell::new(FxHashMap::default()),
            instances: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
        });

        // A parallel index tree per parent index, even when this schema
        // doesn't redeclare it.
        if let Some(p) = &parent {
            let parent_fields: Vec<Vec<ArcStr>> = p.indices.borrow().keys().cloned().collect();
            for fs in parent_fields {
                schema.get_or_create_index(&fs);
            }
        }
        for idx_fields in &desc.own_indices {
            schema.get_or_create_index(idx_fields);
        }

        self.schemas.borrow_mut().insert(schema.name.clone(), schema.clone());
        Ok(Value::Schema(Boxed::new(schema)))
    }

    fn insert(&mut self, schema: &Value, fields: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload> {
        let schema = self.resolve_schema(schema)?;
        let provided = Self::parse_pairs(fields)?;
        let slots = Self::build_slots(&schema, &provided, globals)?;
        let instance = Rc::new(InstanceData::new(schema.clone(), slots));

        {
            let mut instances = schema.instances.borrow_mut();
            instance.list_pos.set(Some(instances.len()));
            instances.push(instance.clone());
        }
        Self::insert_into_indices(&schema, &instance, globals)?;
        self.propagate(&schema, &instance, Event::Insert, true, globals)?;
        Ok(Self::instance_value(&instance))
    }

    fn signal(&mut self, schema: &Value, fields: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload> {
        let schema = self.resolve_schema(schema)?;
        let provided = Self::parse_pairs(fields)?;
        let slots = Self::build_slots(&schema, &provided, globals)?;
        let instance = Rc::new(InstanceData::new(schema.clone(), slots));
        // Transient: never enlisted, never indexed, never the anchor of a
        // migrated listener.
        self.propagate(&schema, &instance, Event::Insert, false, globals)?;
        Ok(Self::instance_value(&instance))
    }

    fn update(&mut self, schema: &Value, keys: &Value, fields: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload> {
        let schema = self.resolve_schema(schema)?;
        let key_pairs = Self::parse_pairs(keys)?;
        let instance = self.find_by_keys(&schema, &key_pairs)?;
        let provided = Self::parse_pairs(fields)?;
        for (name, _) in &provided {
            if schema.is_indexed_field(name) {
                return Err(schema_error(format!(
                    "update: field {name} participates in an index and cannot be modified in place"
                )));
            }
        }
        for (name, value) in &provided {
            let field = schema.field(name).ok_or_else(|| SchemaDef::field_error(name))?;
            match &field.kind {
                FieldKind::Value { slot, .. } => instance.set_slot(*slot, value.clone()),
                _ => return Err(schema_error(format!("cannot write non-value field: {name}"))),
            }
        }
        self.propagate(&schema, &instance, Event::Update, true, globals)?;
        Ok(Value::Nil)
    }

    fn delete(&mut self, schema: &Value, keys: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload> {
        let schema = self.resolve_schema(schema)?;
        let key_pairs = Self::parse_pairs(keys)?;
        let instance = self.find_by_keys(&schema, &key_pairs)?;

        self.propagate(&schema, &instance, Event::Delete, false, globals)?;

        Self::remove_from_indices(&schema, &instance, globals)?;
        if let Some(pos) = instance.list_pos.get() {
            let mut instances = schema.instances.borrow_mut();
            let last = instances.len() - 1;
            instances.swap(pos, last);
            instances.pop();
            if pos < instances.len() {
                instances[pos].list_pos.set(Some(pos));
            }
        }
        instance.list_pos.set(None);
        instance.live.set(false);

        // Listeners resident on the deleted instance go back to being
        // registered at the schema level.
        let resident: Vec<Rc<RefCell<ListenerDef>>> = instance.listeners.borrow_mut().drain(..).collect();
        for l in resident {
            let head_schema = l.borrow().steps[0].schema.clone();
            head_schema.listeners.borrow_mut().push(l);
        }
        Ok(Value::Nil)
    }

    fn exists_lookup(&mut self, step: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload> {
        let plan = listener::parse_step_descriptor(step, |name| self.lookup_schema(name))?;
        if plan.key_fields.is_empty() {
            return Err(schema_error("exists requires at least one key field"));
        }
        let key_vals = match &plan.key_closure {
            Some(closure) => match call_value(closure, &[], globals)? {
                Value::List(l) => l.to_vec(),
                other => return Err(internal(format!("exists key closure must return a list, got {other:?}"))),
            },
            None => return Err(internal("narrow exists step has no key closure")),
        };
        let idx = Self::index_for(&plan.schema, &plan.key_fields);
        let found = idx.get(&listener::key_list(&key_vals))?;
        match (plan.negated, found) {
            (false, Some(inst_val)) => {
                let inst = Self::instance_of(&inst_val)?;
                let mut bound = Vec::with_capacity(plan.binds.len());
                for (_, field) in &plan.binds {
                    bound.push(Self::resolve_field(&inst, field, globals)?);
                }
                Ok(Value::List(List::from_iter(bound)))
            }
            (true, None) => Ok(Value::List(List::new())),
            _ => Ok(Value::Nil),
        }
    }

    fn when_register(&mut self, steps: &Value, body: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload> {
        let step_values = match steps {
            Value::List(l) => l.to_vec(),
            other => return Err(internal(format!("expected when step list, got {other:?}"))),
        };
        let plans: Vec<StepPlan> = step_values
            .iter()
            .map(|v| listener::parse_step_descriptor(v, |name| self.lookup_schema(name)))
            .collect::<Result<_, _>>()?;
        let listener = Rc::new(RefCell::new(ListenerDef {
            steps: plans,
            callback: body.clone(),
            ground_key: RefCell::new(None),
        }));
        self.attach(listener.clone(), globals)?;
        Ok(Value::Listener(Boxed::new(listener)))
    }

    fn field_get(&mut self, instance: &Value, field: &Value, globals: &mut Globals) -> Result<Value, ErrorPayload> {
        let inst = Self::instance_of(instance)?;
        let name = match field {
            Value::String(s) => s,
            other => return Err(internal(format!("expected field name string, got {other:?}"))),
        };
        Self::resolve_field(&inst, name, globals)
    }
}
