use arcstr::ArcStr;
use arrayvec::ArrayVec;
use std::fmt;

/// Maximum number of `(source, line)` frames kept on a propagating error.
/// Instructions keep appending frames as the error unwinds; once this many
/// have accumulated older frames are simply not recorded, bounding the cost
/// of a runaway exception instead of growing an unbounded `Vec`.
pub const MAX_TRACE: usize = 16;

/// The fixed vocabulary of error kinds the runtime can raise. These are
/// plain tags, not distinct Rust error types, so that user code can match
/// on `:type` without the host exposing its internal type hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    #[error("TypeError")]
    TypeError,
    #[error("MethodError")]
    MethodError,
    #[error("CompareError")]
    CompareError,
    #[error("ParseError")]
    ParseError,
    #[error("RegexError")]
    RegexError,
    #[error("SchemaError")]
    SchemaError,
    #[error("FieldError")]
    FieldError,
    #[error("ParamError")]
    ParamError,
    #[error("LoadError")]
    LoadError,
    #[error("NameError")]
    NameError,
    #[error("ResultError")]
    ResultError,
    #[error("InternalError")]
    InternalError,
    #[error("SigarError")]
    SigarError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TypeError => "TypeError",
            ErrorKind::MethodError => "MethodError",
            ErrorKind::CompareError => "CompareError",
            ErrorKind::ParseError => "ParseError",
            ErrorKind::RegexError => "RegexError",
            ErrorKind::SchemaError => "SchemaError",
            ErrorKind::FieldError => "FieldError",
            ErrorKind::ParamError => "ParamError",
            ErrorKind::LoadError => "LoadError",
            ErrorKind::NameError => "NameError",
            ErrorKind::ResultError => "ResultError",
            ErrorKind::InternalError => "InternalError",
            ErrorKind::SigarError => "SigarError",
        }
    }
}

/// One stack frame in an error trace: the source file (or `<expr>` for
/// interactively-entered code) and the line the instruction came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub source: ArcStr,
    pub line: u32,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.line)
    }
}

/// The payload carried by `Value::Error`. Cheap to clone (it is always
/// wrapped in an `Rc` at the `Value` level) and bounded in size regardless
/// of how many instructions the error passes through while unwinding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: ArcStr,
    pub trace: ArrayVec<Frame, MAX_TRACE>,
}

impl ErrorPayload {
    pub fn new(kind: ErrorKind, message: impl Into<ArcStr>) -> Self {
        ErrorPayload { kind, message: message.into(), trace: ArrayVec::new() }
    }

    /// Append a trace frame as the error propagates outward. Once the
    /// trace is full, older (outer) frames stop being recorded rather
    /// than panicking or reallocating -- this is what keeps "trace length
    /// <= 16" an invariant instead of a best effort.
    pub fn push_frame(&mut self, source: ArcStr, line: u32) {
        if !self.trace.is_full() {
            self.trace.push(Frame { source, line });
        }
    }

    pub fn no_matching_method(name: &str, arg_types: &[&'static str]) -> Self {
        let mut message = format!("no matching method for {name}(");
        for (i, t) in arg_types.iter().enumerate() {
            if i > 0 {
                message.push_str(", ");
            }
            message.push_str(t);
        }
        message.push(')');
        ErrorPayload::new(ErrorKind::MethodError, message)
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)?;
        for frame in &self.trace {
            write!(f, "\n    at {frame}")?;
        }
        Ok(())
    }
}
