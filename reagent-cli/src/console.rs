//! Console-scope `var` persistence across separate REPL commands.
//!
//! Each line is compiled independently, so a `var` it declares lives in
//! an ordinary frame slot that's gone the moment that line's call
//! returns. To carry it to the next line, every `var` declared at
//! console scope gets its own externally-owned `Reference` cell kept
//! here; the next line's compile closes over it as an upvalue the same
//! way a nested `fn` closes over an enclosing local (see
//! `reagent_compiler::Compiler::compile_console_line`), and a real
//! assignment inside that line mutates the shared cell directly.
//!
//! Freshly declared names can't be captured that way on the same line
//! they're declared, since nothing outside yet holds their cell -- this
//! module appends a synthetic trailing expression that reads each one
//! back out, and seeds a cell from the result once the line has run.

use arcstr::ArcStr;
use fxhash::FxHashMap;
use reagent_syntax::expr::{Expr, Node};
use reagent_value::{Reference, Value};
use reagent_vm::Globals;
use std::cell::RefCell;
use std::rc::Rc;

pub struct Console {
    scope: FxHashMap<ArcStr, Reference>,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub fn new() -> Self {
        Console { scope: FxHashMap::default() }
    }

    /// Compiles and runs one line. `Ok(Some(v))` is a plain expression's
    /// result, worth echoing; `Ok(None)` covers `var` declarations (whose
    /// value was already consumed to seed their cell) and statements that
    /// evaluated to `nil`.
    pub fn eval(&mut self, text: &str, globals: &mut Globals) -> Result<Option<Value>, String> {
        let source = ArcStr::from("<console>");
        let node = reagent_syntax::parse_program(source.clone(), text)
            .map_err(|e| e.into_payload(source.clone()).to_string())?;
        let Expr::Block(mut stmts) = node.kind else {
            unreachable!("parse_program always yields a top-level Block")
        };

        let new_names: Vec<ArcStr> = stmts
            .iter()
            .filter_map(|s| match &s.kind {
                Expr::Var { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect();

        if !new_names.is_empty() {
            let line = stmts.last().map(|n| n.span.line).unwrap_or(1);
            let echoes = new_names
                .iter()
                .map(|n| Node::new(source.clone(), line, Expr::Ident(n.clone())))
                .collect();
            stmts.push(Node::new(source.clone(), line, Expr::ListLit(echoes)));
        }
        let combined = Node::new(source.clone(), 1, Expr::Block(stmts));

        let known: Vec<ArcStr> = self.scope.keys().cloned().collect();
        let (info, captured) = reagent_compiler::compile_console_line(source, &combined, &known)
            .map_err(|e| e.to_string())?;

        let upvalues: Vec<Reference> = captured
            .iter()
            .map(|name| self.scope.get(name).cloned().expect("compiler only captures names it was given"))
            .collect();

        let result = reagent_vm::run_closure(&info, &upvalues, &[], globals).map_err(|e| e.to_string())?;

        if new_names.is_empty() {
            return Ok(match result {
                Value::Nil => None,
                other => Some(other),
            });
        }

        let values = match result {
            Value::List(l) => l.to_vec(),
            other => vec![other],
        };
        for (name, value) in new_names.into_iter().zip(values) {
            self.scope.insert(name, Rc::new(RefCell::new(value)));
        }
        Ok(None)
    }
}
