use reagent_value::{ErrorKind, ErrorPayload};

#[derive(Debug, Clone, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct SyntaxError {
    pub line: u32,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        SyntaxError { line, message: message.into() }
    }

    /// Lifts into the shared runtime error payload so the scanner/parser
    /// plug straight into the same trace-carrying error value as every
    /// other failure mode.
    pub fn into_payload(self, source: arcstr::ArcStr) -> ErrorPayload {
        let mut p = ErrorPayload::new(ErrorKind::ParseError, self.message);
        p.push_frame(source, self.line);
        p
    }
}
