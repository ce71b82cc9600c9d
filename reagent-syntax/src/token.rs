//! The scanner: turns source text into a flat token stream.
//!
//! Lines are read lazily one at a time by the caller (`next_line`), so
//! the same scanner instance backs both whole-file compilation and the
//! interactive console, where each line is only available once the user
//! has pressed enter.

use arcstr::ArcStr;

#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Literal(ArcStr),
    /// A `{ expr }` interpolation segment; holds the raw text to be
    /// reparsed as an expression by the parser, not yet parsed here.
    Expr(ArcStr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Real(f64),
    Str(Vec<StrPart>),
    Ident(ArcStr),
    Keyword(ArcStr),
    /// `:name` -- a unary method selector.
    MethodSel(ArcStr),
    /// `::op` -- an operator-style method selector (e.g. `::+`).
    OpMethodSel(ArcStr),
    /// `:=` -- assignment.
    Assign,
    Op(ArcStr),
    /// Single-character punctuation: `( ) [ ] { } , . ;`
    Punct(char),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub value: T,
    pub pos: Pos,
}

const KEYWORDS: &[&str] = &[
    "if", "then", "elseif", "else", "end", "loop", "while", "until", "exit", "next", "for", "all",
    "in", "is", "fun", "return", "with", "do", "on", "nil", "and", "or", "not", "old", "def",
    "when", "schema", "index", "exists", "insert", "signal", "update", "delete", "var",
];

pub struct Scanner {
    line: u32,
}

impl Scanner {
    pub fn new() -> Self {
        Scanner { line: 0 }
    }

    /// Tokenize one line of source, advancing the internal line counter.
    /// Comments (`-- ...`) are stripped before tokenizing.
    pub fn scan_line(&mut self, text: &str) -> Result<Vec<Spanned<Token>>, crate::error::SyntaxError> {
        self.line += 1;
        let code = strip_comment(text);
        let mut out = Vec::new();
        let mut chars = code.char_indices().peekable();
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
                continue;
            }
            if c.is_ascii_digit() {
                out.push(self.scan_number(code, &mut chars));
                continue;
            }
            if c == '\'' {
                out.push(self.scan_string(code, &mut chars, true)?);
                continue;
            }
            if c == '"' {
                out.push(self.scan_string(code, &mut chars, false)?);
                continue;
            }
            if c.is_alphabetic() || c == '_' {
                out.push(self.scan_ident(code, &mut chars));
                continue;
            }
            if c == ':' {
                out.push(self.scan_colon(code, &mut chars));
                continue;
            }
            if "()[]{},.;".contains(c) {
                chars.next();
                out.push(Spanned { value: Token::Punct(c), pos: Pos { line: self.line } });
                continue;
            }
            if "+-*/%=!<>?&|".contains(c) {
                out.push(self.scan_op(code, &mut chars));
                continue;
            }
            return Err(crate::error::SyntaxError::new(
                self.line,
                format!("unexpected character '{c}' at offset {i}"),
            ));
        }
        out.push(Spanned { value: Token::Eof, pos: Pos { line: self.line } });
        Ok(out)
    }

    fn scan_number(
        &self,
        code: &str,
        chars: &mut std::iter::Peekable<std::str::CharIndices>,
    ) -> Spanned<Token> {
        let start = chars.peek().unwrap().0;
        let mut end = start;
        let mut is_real = false;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_ascii_digit() {
                end = i + c.len_utf8();
                chars.next();
            } else if (c == '.' || c == 'e' || c == 'E') && !is_real {
                is_real = true;
                end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let text = &code[start..end];
        let value = if is_real {
            Token::Real(text.parse().unwrap_or(0.0))
        } else {
            Token::Int(text.parse().unwrap_or(0))
        };
        Spanned { value, pos: Pos { line: self.line } }
    }

    fn scan_ident(
        &self,
        code: &str,
        chars: &mut std::iter::Peekable<std::str::CharIndices>,
    ) -> Spanned<Token> {
        let start = chars.peek().unwrap().0;
        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let text = &code[start..end];
        let value = if KEYWORDS.contains(&text) {
            Token::Keyword(ArcStr::from(text))
        } else {
            Token::Ident(ArcStr::from(text))
        };
        Spanned { value, pos: Pos { line: self.line } }
    }

    /// `:=` is assignment; `::op` constructs a method value for `op`;
    /// `:name` selects method `name`. Distinguishing `:=` here (rather
    /// than letting it fall into the general selector-name scan, which
    /// would read the `=` as a one-character method name) is what lets
    /// `var l := [3,1,2]` parse as an assignment instead of a call to a
    /// method named `=`.
    fn scan_colon(
        &self,
        code: &str,
        chars: &mut std::iter::Peekable<std::str::CharIndices>,
    ) -> Spanned<Token> {
        chars.next(); // leading ':'
        if matches!(chars.peek(), Some(&(_, '='))) {
            chars.next();
            return Spanned { value: Token::Assign, pos: Pos { line: self.line } };
        }
        let op_style = matches!(chars.peek(), Some(&(_, ':')));
        if op_style {
            chars.next();
        }
        let start = chars.peek().map(|&(i, _)| i).unwrap_or(code.len());
        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_alphanumeric() || c == '_' || "+-*/%=!<>?".contains(c) {
                end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let name = ArcStr::from(&code[start..end]);
        let value = if op_style { Token::OpMethodSel(name) } else { Token::MethodSel(name) };
        Spanned { value, pos: Pos { line: self.line } }
    }

    fn scan_op(
        &self,
        code: &str,
        chars: &mut std::iter::Peekable<std::str::CharIndices>,
    ) -> Spanned<Token> {
        let start = chars.peek().unwrap().0;
        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if "+-*/%=!<>?&|".contains(c) {
                end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        Spanned { value: Token::Op(ArcStr::from(&code[start..end])), pos: Pos { line: self.line } }
    }

    /// Strings use `'...'` (with `{expr}` interpolation) or `"..."` (no
    /// interpolation); both share the same escape set.
    fn scan_string(
        &self,
        code: &str,
        chars: &mut std::iter::Peekable<std::str::CharIndices>,
        interpolates: bool,
    ) -> Result<Spanned<Token>, crate::error::SyntaxError> {
        let quote = if interpolates { '\'' } else { '"' };
        chars.next(); // opening quote
        let mut parts = Vec::new();
        let mut literal = String::new();
        loop {
            match chars.next() {
                None => return Err(crate::error::SyntaxError::new(self.line, "unterminated string")),
                Some((_, c)) if c == quote => break,
                Some((_, '{')) if interpolates => {
                    if !literal.is_empty() {
                        parts.push(StrPart::Literal(ArcStr::from(literal.as_str())));
                        literal.clear();
                    }
                    let mut depth = 1;
                    let mut expr = String::new();
                    for (_, c) in chars.by_ref() {
                        if c == '{' {
                            depth += 1;
                        } else if c == '}' {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        expr.push(c);
                    }
                    parts.push(StrPart::Expr(ArcStr::from(expr.as_str())));
                }
                Some((_, '\\')) => {
                    if let Some((_, esc)) = chars.next() {
                        literal.push(match esc {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            'e' => '\x1b',
                            other => other,
                        });
                    }
                }
                Some((_, c)) => literal.push(c),
            }
        }
        if !literal.is_empty() || parts.is_empty() {
            parts.push(StrPart::Literal(ArcStr::from(literal.as_str())));
        }
        let _ = code;
        Ok(Spanned { value: Token::Str(parts), pos: Pos { line: self.line } })
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find("--") {
        Some(i) => &line[..i],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_identifiers_keywords_and_numbers() {
        let mut s = Scanner::new();
        let toks = s.scan_line("var x := 42").unwrap();
        assert_eq!(
            toks.iter().map(|t| t.value.clone()).collect::<Vec<_>>(),
            vec![
                Token::Keyword("var".into()),
                Token::Ident("x".into()),
                Token::Assign,
                Token::Int(42),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn strips_comments() {
        let mut s = Scanner::new();
        let toks = s.scan_line("1 -- trailing comment").unwrap();
        assert_eq!(toks[0].value, Token::Int(1));
        assert_eq!(toks.len(), 2);
    }

    #[test]
    fn string_with_interpolation_segments() {
        let mut s = Scanner::new();
        let toks = s.scan_line("'hello {name}!'").unwrap();
        match &toks[0].value {
            Token::Str(parts) => {
                assert_eq!(
                    parts,
                    &vec![
                        StrPart::Literal("hello ".into()),
                        StrPart::Expr("name".into()),
                        StrPart::Literal("!".into()),
                    ]
                );
            }
            other => panic!("expected string token, got {other:?}"),
        }
    }

    #[test]
    fn double_quoted_strings_do_not_interpolate() {
        let mut s = Scanner::new();
        let toks = s.scan_line(r#""a {b} c""#).unwrap();
        match &toks[0].value {
            Token::Str(parts) => assert_eq!(parts, &vec![StrPart::Literal("a {b} c".into())]),
            other => panic!("expected string token, got {other:?}"),
        }
    }

    #[test]
    fn method_selectors() {
        let mut s = Scanner::new();
        let toks = s.scan_line("x:size y::+").unwrap();
        assert_eq!(toks[1].value, Token::MethodSel("size".into()));
        assert_eq!(toks[3].value, Token::OpMethodSel("+".into()));
    }

    #[test]
    fn colon_equals_is_assignment_not_a_selector() {
        let mut s = Scanner::new();
        let toks = s.scan_line("l := [3,1,2]").unwrap();
        assert_eq!(toks[1].value, Token::Assign);
    }
}
