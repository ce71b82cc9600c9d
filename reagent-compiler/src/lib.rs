//! Lowers a parsed `reagent_syntax` expression tree into `reagent_vm`
//! bytecode: scope/slot allocation, upvalue capture across nested
//! closures, forward-jump patch lists for control flow, and the
//! relational surface forms (`schema`/`insert`/`signal`/`update`/
//! `delete`/`exists`/`when`) lowered to calls against a handful of
//! well-known native functions `reagent-store` registers into
//! `Globals` (see `compile::Compiler::compile_schema` and friends).

pub mod compile;
pub mod error;
mod freevars;
mod funcstate;

pub use compile::Compiler;
pub use error::CompileError;

use arcstr::ArcStr;
use reagent_syntax::expr::Node;
use reagent_vm::closure::ClosureInfo;
use std::rc::Rc;

pub fn compile_program(source: ArcStr, node: &Node) -> Result<Rc<ClosureInfo>, CompileError> {
    Compiler::compile_program(source, node)
}

/// Compiles one console line against the names already bound in the
/// REPL's console scope; see [`Compiler::compile_console_line`].
pub fn compile_console_line(
    source: ArcStr,
    node: &Node,
    known: &[ArcStr],
) -> Result<(Rc<ClosureInfo>, Vec<ArcStr>), CompileError> {
    Compiler::compile_console_line(source, node, known)
}
