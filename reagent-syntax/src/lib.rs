//! Scanner, expression tree and recursive-descent parser for the
//! reagent language surface. Depends only on `reagent-value` (for the
//! shared error payload type), never on the compiler or runtime.

pub mod error;
pub mod expr;
pub mod parser;
pub mod token;

pub use error::SyntaxError;
pub use expr::{Expr, FieldDecl, FieldInit, JoinStep, Node, Span, StrSeg};
pub use parser::Parser;
pub use token::{Pos, Scanner, Spanned, StrPart, Token};

/// Parse a complete program (possibly multi-line) into a single `Block`
/// node, the parser's top-level entry point.
pub fn parse_program(source: impl Into<arcstr::ArcStr>, text: &str) -> Result<Node, SyntaxError> {
    Parser::parse_program(source, text)
}
