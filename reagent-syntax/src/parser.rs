//! Recursive-descent parser over the scanner's token stream.
//!
//! The token stream is already line-delimited by the scanner, which
//! makes a plain cursor simpler and more direct here than forcing the
//! grammar through a general combinator stream -- see `DESIGN.md` for
//! why this crate doesn't depend on `combine`. Precedence is encoded
//! directly in the call chain (`parse_or` calls `parse_and` calls
//! `parse_simple` calls `parse_postfix` calls `parse_primary`), exactly
//! the `EXPR_SIMPLE < EXPR_AND < EXPR_OR < EXPR_DEFAULT` ladder.
//!
//! Blocks are keyword-delimited, not brace-delimited: `{`/`}` are
//! reserved for list and tree literals. A block is just "statements
//! until one of the keywords that can end it", so most of the work
//! below is picking the right terminator set for each construct.

use crate::error::SyntaxError;
use crate::expr::{Expr, FieldBind, FieldDecl, FieldInit, JoinStep, KeyBind, Node, StrSeg};
use crate::token::{Scanner, StrPart, Token};
use arcstr::ArcStr;

pub struct Parser {
    toks: Vec<Token>,
    lines: Vec<u32>,
    pos: usize,
    source: ArcStr,
}

type PResult<T> = Result<T, SyntaxError>;

impl Parser {
    /// Scan and parse an entire multi-line program in one pass.
    pub fn parse_program(source: impl Into<ArcStr>, text: &str) -> PResult<Node> {
        let source = source.into();
        let mut scanner = Scanner::new();
        let mut toks = Vec::new();
        let mut lines = Vec::new();
        for line in text.lines() {
            let spanned = scanner.scan_line(line)?;
            for t in spanned {
                if t.value != Token::Eof {
                    toks.push(t.value);
                    lines.push(t.pos.line);
                }
            }
        }
        lines.push(lines.last().copied().unwrap_or(1));
        toks.push(Token::Eof);
        let mut p = Parser { toks, lines, pos: 0, source };
        let stmts = p.parse_stmts_until(&[])?;
        if !p.at_eof() {
            return Err(p.err(format!("unexpected trailing token {:?}", p.peek())));
        }
        Ok(p.node(Expr::Block(stmts), 1))
    }

    fn node(&self, kind: Expr, line: u32) -> Node {
        Node::new(self.source.clone(), line, kind)
    }

    fn line(&self) -> u32 {
        self.lines.get(self.pos).copied().unwrap_or(0)
    }

    fn at_eof(&self) -> bool {
        matches!(self.toks.get(self.pos), Some(Token::Eof) | None)
    }

    fn peek(&self) -> &Token {
        self.toks.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn bump(&mut self) -> Token {
        let t = self.toks.get(self.pos).cloned().unwrap_or(Token::Eof);
        if !matches!(t, Token::Eof) {
            self.pos += 1;
        }
        t
    }

    fn err(&self, msg: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line(), msg.into())
    }

    fn expect_punct(&mut self, c: char) -> PResult<()> {
        match self.bump() {
            Token::Punct(p) if p == c => Ok(()),
            other => Err(self.err(format!("expected '{c}', found {other:?}"))),
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> PResult<()> {
        match self.bump() {
            Token::Keyword(k) if k.as_str() == kw => Ok(()),
            other => Err(self.err(format!("expected keyword '{kw}', found {other:?}"))),
        }
    }

    fn expect_assign(&mut self) -> PResult<()> {
        match self.bump() {
            Token::Assign => Ok(()),
            other => Err(self.err(format!("expected ':=', found {other:?}"))),
        }
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Token::Keyword(k) if k.as_str() == kw)
    }

    fn ident(&mut self) -> PResult<ArcStr> {
        match self.bump() {
            Token::Ident(n) => Ok(n),
            other => Err(self.err(format!("expected identifier, found {other:?}"))),
        }
    }

    /// True when the current token cannot begin an expression, i.e. we've
    /// reached whatever follows an optional trailing expression (`exit`,
    /// `return`).
    fn cant_start_expr(&self) -> bool {
        match self.peek() {
            Token::Eof => true,
            Token::Keyword(k) => matches!(k.as_str(), "end" | "else" | "elseif" | "on" | "then" | "do"),
            Token::Punct(c) => matches!(c, ')' | ']' | '}' | ',' | ';'),
            _ => false,
        }
    }

    fn skip_stmt_sep(&mut self) {
        if matches!(self.peek(), Token::Punct(';')) {
            self.bump();
        }
    }

    // ---- blocks ----

    fn at_any_keyword(&self, kws: &[&str]) -> bool {
        matches!(self.peek(), Token::Keyword(k) if kws.contains(&k.as_str()))
    }

    fn parse_stmts_until(&mut self, terminators: &[&str]) -> PResult<Vec<Node>> {
        let mut stmts = Vec::new();
        while !self.at_eof() && !self.at_any_keyword(terminators) {
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_block_until(&mut self, terminators: &[&str]) -> PResult<Node> {
        let line = self.line();
        let stmts = self.parse_stmts_until(terminators)?;
        Ok(self.node(Expr::Block(stmts), line))
    }

    // ---- statements ----
    //
    // Only `var`, `def` and `schema` are block-level statement forms that
    // can't appear as ordinary expressions; everything else (loops, `if`,
    // `do`, the relational forms...) is parsed at term level so it can be
    // used wherever a value is expected, same as the source it's grounded
    // on.

    fn parse_stmt(&mut self) -> PResult<Node> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Token::Keyword(k) if k.as_str() == "var" => {
                self.bump();
                self.parse_var_decls(line)?
            }
            Token::Keyword(k) if k.as_str() == "def" => {
                self.bump();
                let name = self.ident()?;
                self.expect_assign()?;
                let value = Box::new(self.parse_expr()?);
                Expr::Def { name, value }
            }
            Token::Keyword(k) if k.as_str() == "schema" => return self.parse_schema(),
            _ => return self.parse_expr(),
        };
        self.skip_stmt_sep();
        Ok(self.node(kind, line))
    }

    fn parse_var_decls(&mut self, line: u32) -> PResult<Expr> {
        let mut decls = Vec::new();
        loop {
            let name = self.ident()?;
            let value = if matches!(self.peek(), Token::Assign) {
                self.bump();
                Some(Box::new(self.parse_expr()?))
            } else {
                None
            };
            decls.push((name, value));
            if matches!(self.peek(), Token::Punct(',')) {
                self.bump();
                continue;
            }
            break;
        }
        if decls.len() == 1 {
            let (name, value) = decls.into_iter().next().unwrap();
            let value = value.unwrap_or_else(|| Box::new(self.node(Expr::Nil, line)));
            return Ok(Expr::Var { name, value });
        }
        let stmts = decls
            .into_iter()
            .map(|(name, value)| {
                let value = value.unwrap_or_else(|| Box::new(self.node(Expr::Nil, line)));
                self.node(Expr::Var { name, value }, line)
            })
            .collect();
        Ok(Expr::Block(stmts))
    }

    fn parse_schema(&mut self) -> PResult<Node> {
        let line = self.line();
        self.expect_keyword("schema")?;
        let name = self.ident()?;
        let parent = if matches!(self.peek(), Token::Punct('(')) {
            self.bump();
            let p = self.ident()?;
            self.expect_punct(')')?;
            Some(p)
        } else {
            None
        };
        self.expect_keyword("is")?;
        let mut fields = Vec::new();
        let mut indices = Vec::new();
        loop {
            if self.is_keyword("end") {
                self.bump();
                break;
            } else if self.is_keyword("var") {
                self.bump();
                loop {
                    fields.push(FieldDecl::Value { name: self.ident()? });
                    if matches!(self.peek(), Token::Punct(',')) {
                        self.bump();
                        continue;
                    }
                    break;
                }
            } else if self.is_keyword("fun") {
                self.bump();
                let field_name = self.ident()?;
                self.expect_punct('(')?;
                let mut depends_on = Vec::new();
                while !matches!(self.peek(), Token::Punct(')')) {
                    depends_on.push(self.ident()?);
                    if matches!(self.peek(), Token::Punct(',')) {
                        self.bump();
                    }
                }
                self.expect_punct(')')?;
                let body = if self.is_keyword("do") {
                    self.bump();
                    let b = self.parse_block_until(&["end"])?;
                    self.expect_keyword("end")?;
                    b
                } else {
                    self.parse_expr()?
                };
                fields.push(FieldDecl::Computed { name: field_name, depends_on, body: Box::new(body) });
            } else if self.is_keyword("index") {
                self.bump();
                let mut names = vec![self.ident()?];
                while matches!(self.peek(), Token::Punct(',')) {
                    self.bump();
                    names.push(self.ident()?);
                }
                indices.push(names);
            } else {
                let field_name = self.ident()?;
                self.expect_assign()?;
                let value = Box::new(self.parse_expr()?);
                fields.push(FieldDecl::Constant { name: field_name, value });
            }
            if matches!(self.peek(), Token::Punct(',')) {
                self.bump();
            }
        }
        Ok(self.node(Expr::Schema { name, parent, fields, indices }, line))
    }

    // ---- relational forms ----

    /// `( name := expr, ... )`, parens required.
    fn parse_field_inits(&mut self) -> PResult<Vec<FieldInit>> {
        self.expect_punct('(')?;
        let mut fields = Vec::new();
        while !matches!(self.peek(), Token::Punct(')')) {
            let (name, value) = self.parse_name_value()?;
            fields.push(FieldInit { name, value: Box::new(value) });
            if matches!(self.peek(), Token::Punct(',')) {
                self.bump();
            }
        }
        self.expect_punct(')')?;
        Ok(fields)
    }

    /// `[ field := expr, ... ]`, or an empty vec if no `[` follows -- a
    /// broad lookup with no narrowing key.
    fn parse_key_binds(&mut self) -> PResult<Vec<KeyBind>> {
        if !matches!(self.peek(), Token::Punct('[')) {
            return Ok(Vec::new());
        }
        self.bump();
        let mut keys = Vec::new();
        while !matches!(self.peek(), Token::Punct(']')) {
            let (field, expr) = self.parse_name_value()?;
            keys.push(KeyBind { field, expr: Box::new(expr) });
            if matches!(self.peek(), Token::Punct(',')) {
                self.bump();
            }
        }
        self.expect_punct(']')?;
        Ok(keys)
    }

    /// `( alias := field, ... )`, or an empty vec if no `(` follows.
    fn parse_field_binds(&mut self) -> PResult<Vec<FieldBind>> {
        if !matches!(self.peek(), Token::Punct('(')) {
            return Ok(Vec::new());
        }
        self.bump();
        let mut binds = Vec::new();
        while !matches!(self.peek(), Token::Punct(')')) {
            let (alias, value) = self.parse_name_value()?;
            let field = match value.kind {
                Expr::Ident(f) => f,
                _ => return Err(self.err("expected a field name")),
            };
            binds.push(FieldBind { alias, field });
            if matches!(self.peek(), Token::Punct(',')) {
                self.bump();
            }
        }
        self.expect_punct(')')?;
        Ok(binds)
    }

    /// Parses `name := expr`, or bare `name` as shorthand for `name :=
    /// name`, mirroring how the grammar this is grounded on reuses plain
    /// expression parsing for every `(...)`/`[...]` binding list and then
    /// only afterward checks whether it got an assignment or a lone name.
    fn parse_name_value(&mut self) -> PResult<(ArcStr, Node)> {
        let source = self.source.clone();
        let line = self.line();
        let e = self.parse_expr()?;
        match e.kind {
            Expr::Assign { target, value } => match target.kind {
                Expr::Ident(name) => Ok((name, *value)),
                _ => Err(self.err("expected an identifier on the left of ':='")),
            },
            Expr::Ident(name) => {
                let value = Node::new(source, line, Expr::Ident(name.clone()));
                Ok((name, value))
            }
            _ => Err(self.err("expected 'name' or 'name := expr'")),
        }
    }

    fn parse_insert(&mut self) -> PResult<Node> {
        let line = self.line();
        self.expect_keyword("insert")?;
        let schema = self.ident()?;
        let fields = self.parse_field_inits()?;
        Ok(self.node(Expr::Insert { schema, fields }, line))
    }

    fn parse_signal(&mut self) -> PResult<Node> {
        let line = self.line();
        self.expect_keyword("signal")?;
        let schema = self.ident()?;
        let fields = self.parse_field_inits()?;
        Ok(self.node(Expr::Signal { schema, fields }, line))
    }

    fn parse_update(&mut self) -> PResult<Node> {
        let line = self.line();
        self.expect_keyword("update")?;
        let schema = self.ident()?;
        let keys = self.parse_key_binds()?;
        let fields = self.parse_field_inits()?;
        Ok(self.node(Expr::Update { schema, keys, fields }, line))
    }

    fn parse_delete(&mut self) -> PResult<Node> {
        let line = self.line();
        self.expect_keyword("delete")?;
        let schema = self.ident()?;
        let keys = self.parse_key_binds()?;
        Ok(self.node(Expr::Delete { schema, keys }, line))
    }

    /// The first step of a `when` chain: `[delete] [insert] Name[...](...)`.
    fn parse_when_head_step(&mut self) -> PResult<JoinStep> {
        let negated = self.is_keyword("delete");
        if negated {
            self.bump();
        }
        let created_only = self.is_keyword("insert");
        if created_only {
            self.bump();
        }
        let schema = self.ident()?;
        let keys = self.parse_key_binds()?;
        let binds = self.parse_field_binds()?;
        Ok(JoinStep { schema, negated, created_only, keys, binds })
    }

    /// Every other join-step position (later `when` steps, every `exists`
    /// step): `[not] Name[...](...)`.
    fn parse_join_step(&mut self) -> PResult<JoinStep> {
        let negated = self.is_keyword("not");
        if negated {
            self.bump();
        }
        let schema = self.ident()?;
        let keys = self.parse_key_binds()?;
        let binds = if negated { Vec::new() } else { self.parse_field_binds()? };
        Ok(JoinStep { schema, negated, created_only: false, keys, binds })
    }

    fn parse_exists(&mut self) -> PResult<Node> {
        let line = self.line();
        self.expect_keyword("exists")?;
        let mut steps = vec![self.parse_join_step()?];
        while matches!(self.peek(), Token::Punct(',')) {
            self.bump();
            steps.push(self.parse_join_step()?);
        }
        self.expect_keyword("then")?;
        let then_branch = Box::new(self.parse_block_until(&["else", "end"])?);
        let else_branch = if self.is_keyword("else") {
            self.bump();
            Some(Box::new(self.parse_block_until(&["end"])?))
        } else {
            None
        };
        self.expect_keyword("end")?;
        Ok(self.node(Expr::ExistsThenElse { steps, then_branch, else_branch }, line))
    }

    fn parse_when(&mut self) -> PResult<Node> {
        let line = self.line();
        self.expect_keyword("when")?;
        let mut steps = vec![self.parse_when_head_step()?];
        while matches!(self.peek(), Token::Punct(',')) {
            self.bump();
            steps.push(self.parse_join_step()?);
        }
        self.expect_keyword("do")?;
        let body = Box::new(self.parse_block_until(&["end"])?);
        self.expect_keyword("end")?;
        Ok(self.node(Expr::When { steps, body }, line))
    }

    // ---- control forms ----

    fn parse_do(&mut self) -> PResult<Node> {
        let line = self.line();
        self.expect_keyword("do")?;
        let body = Box::new(self.parse_block_until(&["on", "end"])?);
        let handler = if self.is_keyword("on") {
            self.bump();
            let name = self.ident()?;
            self.expect_keyword("do")?;
            let handler_body = Box::new(self.parse_block_until(&["end"])?);
            Some((name, handler_body))
        } else {
            None
        };
        self.expect_keyword("end")?;
        Ok(self.node(Expr::Do { body, handler }, line))
    }

    fn parse_if(&mut self) -> PResult<Node> {
        let line = self.line();
        self.expect_keyword("if")?;
        let mut cases = Vec::new();
        loop {
            let cond = self.parse_expr()?;
            self.expect_keyword("then")?;
            let body = self.parse_block_until(&["elseif", "else", "end"])?;
            cases.push((cond, body));
            if self.is_keyword("elseif") {
                self.bump();
                continue;
            }
            break;
        }
        let else_branch = if self.is_keyword("else") {
            self.bump();
            Some(Box::new(self.parse_block_until(&["end"])?))
        } else {
            None
        };
        self.expect_keyword("end")?;
        Ok(self.node(Expr::If { cases, else_branch }, line))
    }

    fn parse_loop(&mut self) -> PResult<Node> {
        let line = self.line();
        self.expect_keyword("loop")?;
        let body = Box::new(self.parse_block_until(&["end"])?);
        self.expect_keyword("end")?;
        Ok(self.node(Expr::Loop(body), line))
    }

    fn parse_for(&mut self) -> PResult<Node> {
        let line = self.line();
        self.expect_keyword("for")?;
        if self.is_keyword("var") {
            self.bump();
        }
        let var = self.ident()?;
        let key = if matches!(self.peek(), Token::Punct(',')) {
            self.bump();
            Some(self.ident()?)
        } else {
            None
        };
        let iter = if self.is_keyword("in") {
            self.bump();
            Box::new(self.parse_expr()?)
        } else {
            self.expect_assign()?;
            Box::new(self.parse_expr()?)
        };
        self.expect_keyword("do")?;
        let body = Box::new(self.parse_block_until(&["else", "end"])?);
        let else_branch = if self.is_keyword("else") {
            self.bump();
            Some(Box::new(self.parse_block_until(&["end"])?))
        } else {
            None
        };
        self.expect_keyword("end")?;
        Ok(self.node(Expr::ForIn { var, key, iter, body, else_branch }, line))
    }

    fn parse_with(&mut self) -> PResult<Node> {
        let line = self.line();
        self.expect_keyword("with")?;
        let mut bindings = Vec::new();
        loop {
            let name = self.ident()?;
            self.expect_assign()?;
            let value = self.parse_expr()?;
            bindings.push((name, value));
            if matches!(self.peek(), Token::Punct(',')) {
                self.bump();
                continue;
            }
            break;
        }
        self.expect_keyword("do")?;
        let body = Box::new(self.parse_block_until(&["end"])?);
        self.expect_keyword("end")?;
        Ok(self.node(Expr::With { bindings, body }, line))
    }

    fn parse_fn(&mut self) -> PResult<Node> {
        let line = self.line();
        self.expect_keyword("fun")?;
        self.expect_punct('(')?;
        let mut params = Vec::new();
        let mut variadic = false;
        while !matches!(self.peek(), Token::Punct(')')) {
            params.push(self.ident()?);
            if matches!(self.peek(), Token::Punct('[')) {
                self.bump();
                self.expect_punct(']')?;
                variadic = true;
                break;
            }
            if matches!(self.peek(), Token::Punct(',')) {
                self.bump();
            }
        }
        self.expect_punct(')')?;
        let body = Box::new(self.parse_expr()?);
        Ok(self.node(Expr::Fn { params, variadic, body }, line))
    }

    // ---- expressions, by precedence ----

    pub fn parse_expr(&mut self) -> PResult<Node> {
        self.parse_default()
    }

    /// `EXPR_DEFAULT`: assignment, the loosest-binding form.
    fn parse_default(&mut self) -> PResult<Node> {
        let line = self.line();
        let lhs = self.parse_or()?;
        if matches!(self.peek(), Token::Assign) {
            self.bump();
            let value = Box::new(self.parse_default()?);
            return Ok(self.node(Expr::Assign { target: Box::new(lhs), value }, line));
        }
        Ok(lhs)
    }

    /// `EXPR_OR`
    fn parse_or(&mut self) -> PResult<Node> {
        let line = self.line();
        let mut lhs = self.parse_and()?;
        while self.is_keyword("or") {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = self.node(Expr::Or(Box::new(lhs), Box::new(rhs)), line);
        }
        Ok(lhs)
    }

    /// `EXPR_AND`
    fn parse_and(&mut self) -> PResult<Node> {
        let line = self.line();
        let mut lhs = self.parse_simple()?;
        while self.is_keyword("and") {
            self.bump();
            let rhs = self.parse_simple()?;
            lhs = self.node(Expr::And(Box::new(lhs), Box::new(rhs)), line);
        }
        Ok(lhs)
    }

    /// `EXPR_SIMPLE`: the tightest-binding infix operators (comparison
    /// and arithmetic), left-associative.
    fn parse_simple(&mut self) -> PResult<Node> {
        let line = self.line();
        let mut lhs = self.parse_postfix()?;
        loop {
            let op = match self.peek() {
                Token::Op(o) => o.clone(),
                _ => break,
            };
            self.bump();
            let rhs = self.parse_postfix()?;
            lhs = self.node(Expr::BinOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, line);
        }
        Ok(lhs)
    }

    fn parse_postfix(&mut self) -> PResult<Node> {
        let line = self.line();
        let mut node = self.parse_primary()?;
        loop {
            match self.peek().clone() {
                Token::Punct('(') => {
                    let args = self.parse_args()?;
                    node = self.node(Expr::Call { callee: Box::new(node), args }, line);
                }
                Token::MethodSel(name) => {
                    self.bump();
                    let args =
                        if matches!(self.peek(), Token::Punct('(')) { self.parse_args()? } else { Vec::new() };
                    node = self.node(Expr::MethodCall { receiver: Box::new(node), name, args }, line);
                }
                Token::OpMethodSel(name) => {
                    self.bump();
                    let args = self.parse_args()?;
                    node = self.node(Expr::MethodCall { receiver: Box::new(node), name, args }, line);
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_args(&mut self) -> PResult<Vec<Node>> {
        self.expect_punct('(')?;
        let mut args = Vec::new();
        while !matches!(self.peek(), Token::Punct(')')) {
            args.push(self.parse_expr()?);
            if matches!(self.peek(), Token::Punct(',')) {
                self.bump();
            }
        }
        self.expect_punct(')')?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Node> {
        let line = self.line();
        if let Token::Keyword(k) = self.peek().clone() {
            match k.as_str() {
                "do" => return self.parse_do(),
                "if" => return self.parse_if(),
                "loop" => return self.parse_loop(),
                "for" => return self.parse_for(),
                "with" => return self.parse_with(),
                "fun" => return self.parse_fn(),
                "when" => return self.parse_when(),
                "exists" => return self.parse_exists(),
                "insert" => return self.parse_insert(),
                "signal" => return self.parse_signal(),
                "update" => return self.parse_update(),
                "delete" => return self.parse_delete(),
                "not" => {
                    self.bump();
                    let v = Box::new(self.parse_expr()?);
                    return Ok(self.node(Expr::Not(v), line));
                }
                "while" => {
                    self.bump();
                    let c = Box::new(self.parse_expr()?);
                    return Ok(self.node(Expr::While(c), line));
                }
                "until" => {
                    self.bump();
                    let c = Box::new(self.parse_expr()?);
                    return Ok(self.node(Expr::Until(c), line));
                }
                "exit" => {
                    self.bump();
                    let v = if self.cant_start_expr() { None } else { Some(Box::new(self.parse_expr()?)) };
                    return Ok(self.node(Expr::Exit(v), line));
                }
                "next" => {
                    self.bump();
                    return Ok(self.node(Expr::Next, line));
                }
                "return" => {
                    self.bump();
                    let v = if self.cant_start_expr() { None } else { Some(Box::new(self.parse_expr()?)) };
                    return Ok(self.node(Expr::Return(v), line));
                }
                "nil" => {
                    self.bump();
                    return Ok(self.node(Expr::Nil, line));
                }
                "old" => {
                    self.bump();
                    return Ok(self.node(Expr::Old, line));
                }
                _ => {}
            }
        }
        match self.bump() {
            Token::Int(i) => Ok(self.node(Expr::Int(i), line)),
            Token::Real(r) => Ok(self.node(Expr::Real(r), line)),
            Token::Str(parts) => self.build_str(parts, line),
            Token::Ident(name) => Ok(self.node(Expr::Ident(name), line)),
            Token::Punct('(') => {
                let e = self.parse_expr()?;
                self.expect_punct(')')?;
                Ok(e)
            }
            Token::Punct('[') => {
                let mut items = Vec::new();
                while !matches!(self.peek(), Token::Punct(']')) {
                    items.push(self.parse_expr()?);
                    if matches!(self.peek(), Token::Punct(',')) {
                        self.bump();
                    }
                }
                self.expect_punct(']')?;
                Ok(self.node(Expr::ListLit(items), line))
            }
            Token::Punct('{') => {
                let mut items = Vec::new();
                while !matches!(self.peek(), Token::Punct('}')) {
                    let k = self.parse_expr()?;
                    self.expect_keyword("is")?;
                    let v = self.parse_expr()?;
                    items.push((k, v));
                    if matches!(self.peek(), Token::Punct(',')) {
                        self.bump();
                    }
                }
                self.expect_punct('}')?;
                Ok(self.node(Expr::TreeLit(items), line))
            }
            other => Err(self.err(format!("unexpected token {other:?}"))),
        }
    }

    fn build_str(&mut self, parts: Vec<StrPart>, line: u32) -> PResult<Node> {
        let mut segs = Vec::with_capacity(parts.len());
        for p in parts {
            match p {
                StrPart::Literal(s) => segs.push(StrSeg::Literal(s)),
                StrPart::Expr(src) => {
                    let sub = Parser::parse_program(self.source.clone(), &src)?;
                    segs.push(StrSeg::Expr(Box::new(sub)));
                }
            }
        }
        Ok(self.node(Expr::Str(segs), line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_with_precedence() {
        let prog = Parser::parse_program("<test>", "1 + 2 * 3").unwrap();
        match &prog.kind {
            Expr::Block(stmts) => assert_eq!(stmts.len(), 1),
            _ => panic!(),
        }
    }

    #[test]
    fn parses_assignment_and_if() {
        let prog = Parser::parse_program(
            "<test>",
            "var l := [3,1,2]\nif l:size() > 0 then\nl := l\nend",
        )
        .unwrap();
        match &prog.kind {
            Expr::Block(stmts) => {
                assert_eq!(stmts.len(), 2);
                assert!(matches!(stmts[0].kind, Expr::Var { .. }));
                assert!(matches!(stmts[1].kind, Expr::If { .. }));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn parses_for_loop_over_a_list() {
        let prog = Parser::parse_program(
            "<test>",
            "var s := 0\nfor x in l do\ns := s + x\nend",
        )
        .unwrap();
        match &prog.kind {
            Expr::Block(stmts) => assert!(matches!(stmts[1].kind, Expr::ForIn { .. })),
            _ => panic!(),
        }
    }

    #[test]
    fn parses_do_on_as_try_catch() {
        let prog = Parser::parse_program(
            "<test>",
            "do\nvar r := 1/0\non e do\nprint(e:type)\nend",
        )
        .unwrap();
        match &prog.kind {
            Expr::Block(stmts) => match &stmts[0].kind {
                Expr::Do { handler, .. } => {
                    let (name, _) = handler.as_ref().expect("handler present");
                    assert_eq!(name.as_str(), "e");
                }
                other => panic!("expected Do, got {other:?}"),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn parses_schema_and_insert() {
        let prog = Parser::parse_program(
            "<test>",
            "schema Person is var Name, Age end\ninsert Person(Name := \"A\", Age := 20)",
        )
        .unwrap();
        match &prog.kind {
            Expr::Block(stmts) => {
                assert!(matches!(stmts[0].kind, Expr::Schema { .. }));
                assert!(matches!(stmts[1].kind, Expr::Insert { .. }));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn parses_when_join_with_not() {
        let prog = Parser::parse_program(
            "<test>",
            "when P(a := X) , not Q[y := a] do\nprint(a)\nend",
        )
        .unwrap();
        match &prog.kind {
            Expr::Block(stmts) => match &stmts[0].kind {
                Expr::When { steps, .. } => {
                    assert_eq!(steps.len(), 2);
                    assert!(steps[1].negated);
                }
                other => panic!("expected When, got {other:?}"),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn parses_loop_with_exit_and_next() {
        let prog = Parser::parse_program(
            "<test>",
            "loop\nif x then exit 1 end\nnext\nend",
        )
        .unwrap();
        match &prog.kind {
            Expr::Block(stmts) => assert!(matches!(stmts[0].kind, Expr::Loop(_))),
            _ => panic!(),
        }
    }
}
