use super::Parser;
use crate::ast::{Expr, Stmt};
use crate::error::LowerError;
use crate::lexer::Token;

impl<'a> Parser<'a> {
    pub(super) fn parse_stmt(&mut self) -> Result<Stmt, LowerError> {
        let stmt = if self.is_word("let") {
            self.parse_let()?
        } else if self.is_word("return") {
            self.advance();
            if matches!(self.peek(), Token::Semi | Token::RBrace | Token::Eof) {
                Stmt::Return(None)
            } else {
                Stmt::Return(Some(self.parse_expr()?))
            }
        } else if matches!(self.peek(), Token::Word(_)) && self.peek_at(1) == &Token::Assign {
            let prov = self.prov();
            let name = self.take_ident()?;
            self.advance(); // '='
            let value = self.parse_expr()?;
            Stmt::Assign { name, value, prov }
        } else {
            Stmt::Expr(self.parse_expr()?)
        };
        self.eat(&Token::Semi);
        Ok(stmt)
    }

    fn parse_let(&mut self) -> Result<Stmt, LowerError> {
        let prov = self.prov();
        self.advance(); // 'let'

        if !matches!(self.peek(), Token::At | Token::AtNullish) {
            let name = self.take_ident()?;
            self.expect(Token::Assign, "=")?;
            let value = self.parse_expr()?;
            return Ok(Stmt::Let { name, value, prov });
        }

        // Creation shorthand: `let @name = E`, `let @@name = E`, ...
        let mut markers = 0u32;
        loop {
            match self.peek() {
                Token::At => {
                    markers += 1;
                    self.advance();
                }
                Token::AtNullish => {
                    return Err(self.err("nullish marker is not allowed in a creation declaration"));
                }
                _ => break,
            }
        }
        let target = self.parse_postfix()?;
        self.expect(Token::Assign, "=")?;
        let value = self.parse_expr()?;

        match target {
            Expr::Ident(name) if markers == 1 => Ok(Stmt::Create { name, value, prov }),
            target => Ok(Stmt::ChainCreate {
                markers,
                target,
                value,
                prov,
            }),
        }
    }

    /// `{ stmt* }`
    pub(super) fn parse_block(&mut self) -> Result<Vec<Stmt>, LowerError> {
        self.expect(Token::LBrace, "{")?;
        let mut stmts = Vec::new();
        while !matches!(self.peek(), Token::RBrace | Token::Eof) {
            if self.eat(&Token::Semi) {
                continue;
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(Token::RBrace, "}")?;
        Ok(stmts)
    }
}
