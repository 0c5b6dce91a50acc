use super::{Parser, KEYWORDS};
use crate::ast::{
    BinaryOp, Body, CatchClause, ContextExpr, ContextOrigin, Expr, FlattenExpr, Function, Literal,
    ObserveExpr, Param, UnaryOp,
};
use crate::error::LowerError;
use crate::lexer::Token;

impl<'a> Parser<'a> {
    // -- Expression parsing --------------------------------------

    pub fn parse_expr(&mut self) -> Result<Expr, LowerError> {
        self.enter()?;
        let result = self.parse_expr_inner();
        self.exit();
        result
    }

    fn parse_expr_inner(&mut self) -> Result<Expr, LowerError> {
        let opens_context =
            self.peek() == &Token::At && matches!(self.peek_at(1), Token::Arrow | Token::LParen);
        if opens_context {
            return self.parse_context();
        }
        if self.peek() == &Token::LParen && self.at_arrow_params() {
            return self.parse_arrow();
        }
        if self.is_word("observe") {
            return self.parse_observe();
        }
        self.parse_conditional()
    }

    fn parse_conditional(&mut self) -> Result<Expr, LowerError> {
        let test = self.parse_binary(BinaryOp::Coalesce.precedence())?;
        if !self.eat(&Token::Question) {
            return Ok(test);
        }
        let consequent = self.parse_expr()?;
        self.expect(Token::Colon, ":")?;
        let alternate = self.parse_expr()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn binary_op(&self) -> Option<BinaryOp> {
        let op = match self.peek() {
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Percent => BinaryOp::Rem,
            Token::EqEq => BinaryOp::Eq,
            Token::Neq => BinaryOp::Neq,
            Token::Lt => BinaryOp::Lt,
            Token::Lte => BinaryOp::Lte,
            Token::Gt => BinaryOp::Gt,
            Token::Gte => BinaryOp::Gte,
            Token::AndAnd => BinaryOp::And,
            Token::OrOr => BinaryOp::Or,
            Token::Coalesce => BinaryOp::Coalesce,
            _ => return None,
        };
        Some(op)
    }

    /// Precedence climbing over the left-associative binary operators.
    /// Every operator applied nests the tree one level deeper, so each
    /// one counts against the depth guard until the chain is done.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, LowerError> {
        let mut wraps = 0;
        let result = self.parse_binary_chain(min_prec, &mut wraps);
        self.unwind(wraps);
        result
    }

    fn parse_binary_chain(&mut self, min_prec: u8, wraps: &mut usize) -> Result<Expr, LowerError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.binary_op() {
            if op.precedence() < min_prec {
                break;
            }
            self.advance();
            self.wrap(wraps)?;
            let right = self.parse_binary(op.precedence() + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, LowerError> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary();
        self.exit();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    /// Primary followed by any number of `.name`, `(args)` and `[index]`.
    pub(super) fn parse_postfix(&mut self) -> Result<Expr, LowerError> {
        let mut wraps = 0;
        let result = self.parse_postfix_chain(&mut wraps);
        self.unwind(wraps);
        result
    }

    fn parse_postfix_chain(&mut self, wraps: &mut usize) -> Result<Expr, LowerError> {
        let mut expr = self.parse_primary()?;
        loop {
            // `.name(args)` is one step.
            let nests = match self.peek() {
                Token::Dot | Token::LBracket => true,
                Token::LParen => !matches!(expr, Expr::Member { .. }),
                _ => false,
            };
            if nests {
                self.wrap(wraps)?;
            }
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let property = match self.peek().clone() {
                        Token::Word(w) => {
                            self.advance();
                            w
                        }
                        other => {
                            return Err(self.err(format!("expected property name, got {:?}", other)))
                        }
                    };
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                    };
                }
                Token::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    while self.peek() != &Token::RParen {
                        args.push(self.parse_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::RParen, ")")?;
                    expr = Expr::call(expr, args);
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(Token::RBracket, "]")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, LowerError> {
        match self.peek().clone() {
            Token::Int(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Int(n)))
            }
            Token::Float(f) => {
                self.advance();
                Ok(Expr::Literal(Literal::Float(f)))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::Str(s)))
            }
            Token::Word(w) if w == "true" => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            Token::Word(w) if w == "false" => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            Token::Word(w) if w == "null" => {
                self.advance();
                Ok(Expr::Literal(Literal::Null))
            }
            Token::Word(w) if !KEYWORDS.contains(&w.as_str()) => {
                self.advance();
                Ok(Expr::Ident(w))
            }
            Token::LParen => {
                self.advance();
                let e = self.parse_expr()?;
                self.expect(Token::RParen, ")")?;
                Ok(e)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while self.peek() != &Token::RBracket {
                    items.push(self.parse_expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::RBracket, "]")?;
                Ok(Expr::Array(items))
            }
            Token::At | Token::AtNullish => self.parse_flatten(),
            other => Err(self.err(format!("expected expression, got {:?}", other))),
        }
    }

    // -- Observable-context syntax --------------------------------

    /// `@x`, `@@x`, `@?x`, `@@?x`; the nullish marker may only be innermost.
    fn parse_flatten(&mut self) -> Result<Expr, LowerError> {
        let mut wraps = 0;
        let result = self.parse_flatten_markers(&mut wraps);
        self.unwind(wraps);
        result
    }

    /// Every marker past the first lowers to one more nested switch, so
    /// each marker counts against the depth guard.
    fn parse_flatten_markers(&mut self, wraps: &mut usize) -> Result<Expr, LowerError> {
        let prov = self.prov();
        let mut depth = 0u32;
        let mut nullish = false;
        loop {
            if matches!(self.peek(), Token::At | Token::AtNullish) && !nullish {
                self.wrap(wraps)?;
            }
            match self.peek() {
                Token::At | Token::AtNullish if nullish => {
                    return Err(self.err("the nullish flatten marker must be the innermost marker"));
                }
                Token::At => {
                    depth += 1;
                    self.advance();
                }
                Token::AtNullish => {
                    depth += 1;
                    nullish = true;
                    self.advance();
                }
                _ => break,
            }
        }
        let target = match self.peek().clone() {
            Token::Word(w) if !KEYWORDS.contains(&w.as_str()) => {
                self.advance();
                w
            }
            other => {
                return Err(self.err(format!(
                    "expected identifier after flatten marker, got {:?}",
                    other
                )))
            }
        };
        Ok(Expr::Flatten(FlattenExpr {
            target,
            depth,
            nullish,
            prov,
        }))
    }

    /// `@ => body` or `@(a, b) => body`
    fn parse_context(&mut self) -> Result<Expr, LowerError> {
        let prov = self.prov();
        self.advance(); // '@'
        let deps = if self.peek() == &Token::LParen {
            Some(self.parse_ident_list()?)
        } else {
            None
        };
        self.expect(Token::Arrow, "=>")?;
        let body = self.parse_body()?;
        Ok(Expr::Context(Box::new(ContextExpr {
            id: None,
            origin: ContextOrigin::Arrow,
            deps,
            body,
            prov,
        })))
    }

    /// `observe [(deps)] { ... } [catch [(e)] { ... }] [finally { ... }]`
    fn parse_observe(&mut self) -> Result<Expr, LowerError> {
        let prov = self.prov();
        self.advance(); // 'observe'
        let deps = if self.peek() == &Token::LParen {
            Some(self.parse_ident_list()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        let catch = if self.is_word("catch") {
            self.advance();
            let param = if self.eat(&Token::LParen) {
                let name = self.take_ident()?;
                self.expect(Token::RParen, ")")?;
                Some(name)
            } else {
                None
            };
            let body = self.parse_block()?;
            Some(CatchClause { param, body })
        } else {
            None
        };
        let finally = if self.is_word("finally") {
            self.advance();
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Expr::Observe(Box::new(ObserveExpr {
            id: None,
            deps,
            body,
            catch,
            finally,
            prov,
        })))
    }

    // -- Arrow functions ------------------------------------------

    /// At `(`: does the matching `)` precede `=>`?
    fn at_arrow_params(&self) -> bool {
        let mut depth = 0usize;
        let mut idx = self.pos;
        while idx < self.tokens.len() {
            match self.tokens[idx].token {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(idx + 1).map(|s| &s.token),
                            Some(Token::Arrow)
                        );
                    }
                }
                Token::Eof => return false,
                _ => {}
            }
            idx += 1;
        }
        false
    }

    fn parse_arrow(&mut self) -> Result<Expr, LowerError> {
        self.expect(Token::LParen, "(")?;
        let mut params = Vec::new();
        while self.peek() != &Token::RParen {
            if self.eat(&Token::LBracket) {
                let mut names = Vec::new();
                while self.peek() != &Token::RBracket {
                    names.push(self.take_ident()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::RBracket, "]")?;
                params.push(Param::Tuple(names));
            } else {
                params.push(Param::Name(self.take_ident()?));
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen, ")")?;
        self.expect(Token::Arrow, "=>")?;
        let body = self.parse_body()?;
        Ok(Expr::Arrow(Box::new(Function { params, body })))
    }

    /// Block when the next token is `{`, expression otherwise.
    fn parse_body(&mut self) -> Result<Body, LowerError> {
        if self.peek() == &Token::LBrace {
            Ok(Body::Block(self.parse_block()?))
        } else {
            Ok(Body::Expr(Box::new(self.parse_expr()?)))
        }
    }
}
