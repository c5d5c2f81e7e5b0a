//! Recursive-descent parser for strategy scripts.
//!
//! Grammar sketch:
//!   program   := fn_def*
//!   fn_def    := "fn" ident "(" params ")" block
//!   block     := "{" stmt* "}"
//!   stmt      := "let" ident "=" expr ";"
//!              | ident "=" expr ";"
//!              | ident "[" expr "]" "=" expr ";"
//!              | "if" expr block ("else" (block | if_stmt))?
//!              | "while" expr block
//!              | "return" expr? ";"
//!              | expr ";"
//!   expr      := or-chain with the usual precedence; postfix call/index/field
//!   primary   := literal | ident | "(" expr ")" | map literal

use crate::sandbox::ast::{BinOp, Expr, Function, Program, Stmt, UnOp};
use crate::sandbox::token::{Spanned, Token};
use crate::sandbox::validate::ValidationError;

pub fn parse(tokens: &[Spanned]) -> Result<Program, ValidationError> {
    let mut parser = Parser { tokens, pos: 0 };
    let mut functions = Vec::new();
    while !parser.at_end() {
        functions.push(parser.fn_def()?);
    }
    Ok(Program { functions })
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line)
    }

    fn advance(&mut self) -> Option<&'a Spanned> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn check(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, context: &str) -> Result<u32, ValidationError> {
        let line = self.line();
        match self.advance() {
            Some(s) if s.token == expected => Ok(s.line),
            Some(s) => Err(self.syntax(
                s.line,
                &format!("expected {expected:?} {context}, found {:?}", s.token),
            )),
            None => Err(self.syntax(line, &format!("expected {expected:?} {context}, found end of input"))),
        }
    }

    fn expect_ident(&mut self, context: &str) -> Result<(String, u32), ValidationError> {
        let line = self.line();
        match self.advance() {
            Some(Spanned { token: Token::Ident(name), line }) => Ok((name.clone(), *line)),
            Some(s) => Err(self.syntax(
                s.line,
                &format!("expected identifier {context}, found {:?}", s.token),
            )),
            None => Err(self.syntax(line, &format!("expected identifier {context}"))),
        }
    }

    fn syntax(&self, line: u32, message: &str) -> ValidationError {
        ValidationError::Syntax { line, message: message.to_string() }
    }

    // ── Declarations and statements ──────────────────────────────────

    fn fn_def(&mut self) -> Result<Function, ValidationError> {
        let line = self.expect(Token::Fn, "at top level")?;
        let (name, _) = self.expect_ident("after 'fn'")?;
        self.expect(Token::LParen, "after function name")?;

        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                let (param, _) = self.expect_ident("in parameter list")?;
                params.push(param);
                if !self.check(&Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RParen, "after parameters")?;
        }

        let body = self.block()?;
        Ok(Function { name, params, body, line })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ValidationError> {
        self.expect(Token::LBrace, "to open block")?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.at_end() {
                return Err(self.syntax(self.line(), "unterminated block"));
            }
            stmts.push(self.stmt()?);
        }
        Ok(stmts)
    }

    fn stmt(&mut self) -> Result<Stmt, ValidationError> {
        let line = self.line();
        match self.peek() {
            Some(Token::Let) => {
                self.pos += 1;
                let (name, _) = self.expect_ident("after 'let'")?;
                self.expect(Token::Assign, "in let binding")?;
                let expr = self.expr()?;
                self.expect(Token::Semi, "after let binding")?;
                Ok(Stmt::Let { name, expr, line })
            }
            Some(Token::If) => self.if_stmt(),
            Some(Token::While) => {
                self.pos += 1;
                let cond = self.expr()?;
                let body = self.block()?;
                Ok(Stmt::While { cond, body, line })
            }
            Some(Token::Return) => {
                self.pos += 1;
                let expr = if self.check(&Token::Semi) {
                    None
                } else {
                    let e = self.expr()?;
                    self.expect(Token::Semi, "after return value")?;
                    Some(e)
                };
                Ok(Stmt::Return { expr, line })
            }
            // `x = expr;` — plain assignment
            Some(Token::Ident(_)) if self.peek_at(1) == Some(&Token::Assign) => {
                let (name, _) = self.expect_ident("")?;
                self.pos += 1; // '='
                let expr = self.expr()?;
                self.expect(Token::Semi, "after assignment")?;
                Ok(Stmt::Assign { name, expr, line })
            }
            // `x[key] = expr;` vs. the expression `x[key]` — scan for the
            // '=' that follows the matching ']'
            Some(Token::Ident(_))
                if self.peek_at(1) == Some(&Token::LBracket) && self.index_assign_ahead() =>
            {
                let (target, _) = self.expect_ident("")?;
                self.pos += 1; // '['
                let index = self.expr()?;
                self.expect(Token::RBracket, "in index assignment")?;
                self.expect(Token::Assign, "in index assignment")?;
                let expr = self.expr()?;
                self.expect(Token::Semi, "after index assignment")?;
                Ok(Stmt::IndexAssign { target, index, expr, line })
            }
            _ => {
                let expr = self.expr()?;
                self.expect(Token::Semi, "after expression")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn if_stmt(&mut self) -> Result<Stmt, ValidationError> {
        let line = self.expect(Token::If, "")?;
        let cond = self.expr()?;
        let then_body = self.block()?;
        let else_body = if self.check(&Token::Else) {
            if self.peek() == Some(&Token::If) {
                vec![self.if_stmt()?]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If { cond, then_body, else_body, line })
    }

    /// Lookahead from `ident [` — true when the bracket that opens at
    /// offset 1 closes and is immediately followed by `=` (not `==`).
    fn index_assign_ahead(&self) -> bool {
        let mut depth = 0usize;
        let mut offset = 1;
        loop {
            match self.peek_at(offset) {
                Some(Token::LBracket) => depth += 1,
                Some(Token::RBracket) => {
                    depth -= 1;
                    if depth == 0 {
                        return self.peek_at(offset + 1) == Some(&Token::Assign);
                    }
                }
                Some(Token::Semi) | None => return false,
                _ => {}
            }
            offset += 1;
        }
    }

    // ── Expressions, lowest to highest precedence ────────────────────

    fn expr(&mut self) -> Result<Expr, ValidationError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, ValidationError> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Token::OrOr) {
            let line = self.line();
            self.pos += 1;
            let rhs = self.and_expr()?;
            lhs = Expr::Binary { op: BinOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ValidationError> {
        let mut lhs = self.equality()?;
        while self.peek() == Some(&Token::AndAnd) {
            let line = self.line();
            self.pos += 1;
            let rhs = self.equality()?;
            lhs = Expr::Binary { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, ValidationError> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinOp::Eq,
                Some(Token::Ne) => BinOp::Ne,
                _ => break,
            };
            let line = self.line();
            self.pos += 1;
            let rhs = self.comparison()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, ValidationError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Ge) => BinOp::Ge,
                _ => break,
            };
            let line = self.line();
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, ValidationError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            let line = self.line();
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, ValidationError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            let line = self.line();
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ValidationError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                let expr = self.unary()?;
                Ok(Expr::Unary { op: UnOp::Neg, expr: Box::new(expr) })
            }
            Some(Token::Not) => {
                self.pos += 1;
                let expr = self.unary()?;
                Ok(Expr::Unary { op: UnOp::Not, expr: Box::new(expr) })
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ValidationError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::LBracket) => {
                    let line = self.line();
                    self.pos += 1;
                    let index = self.expr()?;
                    self.expect(Token::RBracket, "after index")?;
                    expr = Expr::Index { target: Box::new(expr), index: Box::new(index), line };
                }
                Some(Token::Dot) => {
                    self.pos += 1;
                    let (name, line) = self.expect_ident("after '.'")?;
                    expr = Expr::Field { target: Box::new(expr), name, line };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ValidationError> {
        let line = self.line();
        match self.advance().map(|s| s.token.clone()) {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Nil) => Ok(Expr::Nil),
            Some(Token::Ident(name)) => {
                if self.check(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.check(&Token::RParen) {
                        loop {
                            args.push(self.expr()?);
                            if !self.check(&Token::Comma) {
                                break;
                            }
                        }
                        self.expect(Token::RParen, "after call arguments")?;
                    }
                    Ok(Expr::Call { name, args, line })
                } else {
                    Ok(Expr::Ident { name, line })
                }
            }
            Some(Token::LParen) => {
                let expr = self.expr()?;
                self.expect(Token::RParen, "after parenthesized expression")?;
                Ok(expr)
            }
            Some(Token::LBrace) => self.map_lit(line),
            Some(other) => Err(self.syntax(line, &format!("unexpected token {other:?}"))),
            None => Err(self.syntax(line, "unexpected end of input")),
        }
    }

    fn map_lit(&mut self, line: u32) -> Result<Expr, ValidationError> {
        let mut entries = Vec::new();
        if self.check(&Token::RBrace) {
            return Ok(Expr::MapLit { entries, line });
        }
        loop {
            let key = match self.advance().map(|s| s.token.clone()) {
                Some(Token::Ident(k)) => k,
                Some(Token::Str(k)) => k,
                other => {
                    return Err(self.syntax(
                        self.line(),
                        &format!("expected map key, found {other:?}"),
                    ));
                }
            };
            self.expect(Token::Colon, "after map key")?;
            let value = self.expr()?;
            entries.push((key, value));
            if !self.check(&Token::Comma) {
                break;
            }
            // allow a trailing comma
            if self.peek() == Some(&Token::RBrace) {
                break;
            }
        }
        self.expect(Token::RBrace, "to close map literal")?;
        Ok(Expr::MapLit { entries, line })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::token::tokenize;

    fn parse_src(source: &str) -> Result<Program, ValidationError> {
        parse(&tokenize(source).unwrap())
    }

    #[test]
    fn parses_minimal_decide() {
        let program = parse_src("fn decide(window, state) { return { signal: \"none\" }; }")
            .unwrap();
        assert_eq!(program.functions.len(), 1);
        let f = program.function("decide").unwrap();
        assert_eq!(f.params, vec!["window", "state"]);
        assert_eq!(f.body.len(), 1);
    }

    #[test]
    fn parses_let_if_else_chain() {
        let src = r#"
fn decide(window, state) {
    let x = 1 + 2 * 3;
    if x > 5 {
        return { signal: "buy" };
    } else if x > 2 {
        return { signal: "sell" };
    } else {
        return nil;
    }
}
"#;
        let program = parse_src(src).unwrap();
        let body = &program.function("decide").unwrap().body;
        assert!(matches!(body[0], Stmt::Let { .. }));
        assert!(matches!(body[1], Stmt::If { .. }));
    }

    #[test]
    fn precedence_mul_over_add() {
        let program = parse_src("fn f() { let x = 1 + 2 * 3; }").unwrap();
        let Stmt::Let { expr, .. } = &program.functions[0].body[0] else {
            panic!("expected let");
        };
        let Expr::Binary { op: BinOp::Add, rhs, .. } = expr else {
            panic!("expected top-level add, got {expr:?}");
        };
        assert!(matches!(**rhs, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn parses_index_assignment() {
        let program = parse_src("fn f(state) { state[\"k\"] = 1; }").unwrap();
        assert!(matches!(
            program.functions[0].body[0],
            Stmt::IndexAssign { .. }
        ));
    }

    #[test]
    fn index_read_is_not_index_assignment() {
        let program = parse_src("fn f(state) { let x = state[\"k\"] == 1; }").unwrap();
        assert!(matches!(program.functions[0].body[0], Stmt::Let { .. }));
    }

    #[test]
    fn parses_field_access_and_negative_index() {
        let program = parse_src("fn f(window) { let c = window.close[-1]; }").unwrap();
        let Stmt::Let { expr, .. } = &program.functions[0].body[0] else {
            panic!("expected let");
        };
        assert!(matches!(expr, Expr::Index { .. }));
    }

    #[test]
    fn parses_while_loop() {
        let program = parse_src("fn f() { let i = 0; while i < 10 { i = i + 1; } }").unwrap();
        assert!(matches!(program.functions[0].body[1], Stmt::While { .. }));
    }

    #[test]
    fn parses_map_with_trailing_comma() {
        let program =
            parse_src("fn f() { return { signal: \"buy\", stop_loss: 0.98, }; }").unwrap();
        let Stmt::Return { expr: Some(Expr::MapLit { entries, .. }), .. } =
            &program.functions[0].body[0]
        else {
            panic!("expected return of map literal");
        };
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn missing_semicolon_is_rejected() {
        assert!(parse_src("fn f() { let x = 1 }").is_err());
    }

    #[test]
    fn unterminated_block_is_rejected() {
        assert!(parse_src("fn f() { let x = 1;").is_err());
    }

    #[test]
    fn top_level_statement_is_rejected() {
        assert!(parse_src("let x = 1;").is_err());
    }
}
