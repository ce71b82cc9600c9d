//! Compile-time errors. These never reach a running program -- they stop
//! `compile_program` before any bytecode is produced -- so they are kept
//! separate from `reagent_value::ErrorKind`, which is the vocabulary for
//! errors a *running* script can raise and catch.

use arcstr::ArcStr;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{source}:{line}: {message}")]
pub struct CompileError {
    pub source: ArcStr,
    pub line: u32,
    pub message: String,
}

impl CompileError {
    pub fn new(source: ArcStr, line: u32, message: impl Into<String>) -> Self {
        CompileError { source, line, message: message.into() }
    }
}
