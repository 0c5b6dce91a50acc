/// Surface reader for the host expression subset.
/// Statements and observable-context nodes carry provenance (file, line,
/// column of their first token). No scoping or validation happens here --
/// that is the passes' job.
use crate::ast::{Program, Provenance, Stmt};
use crate::config::{DepthGuard, LoweringConfig};
use crate::error::LowerError;
use crate::lexer::{self, Spanned, Token};

mod expressions;
mod statements;

pub(crate) const KEYWORDS: &[&str] = &[
    "let", "return", "observe", "catch", "finally", "true", "false", "null",
];

// ──────────────────────────────────────────────
// Parser
// ──────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    filename: String,
    guard: DepthGuard,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned], filename: &str, max_depth: usize) -> Self {
        Parser {
            tokens,
            pos: 0,
            filename: filename.to_owned(),
            guard: DepthGuard::new(max_depth),
        }
    }

    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn prov(&self) -> Provenance {
        let s = self.cur();
        Provenance::new(&self.filename, s.line, s.column)
    }

    fn advance(&mut self) -> &Spanned {
        let t = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: Token, shown: &str) -> Result<(), LowerError> {
        if self.peek() == &token {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected '{}', got {:?}", shown, self.peek())))
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn err(&self, msg: impl Into<String>) -> LowerError {
        let s = self.cur();
        LowerError::parse(&self.filename, s.line, s.column, msg)
    }

    fn is_word(&self, w: &str) -> bool {
        matches!(self.peek(), Token::Word(x) if x == w)
    }

    /// Take a non-keyword identifier.
    fn take_ident(&mut self) -> Result<String, LowerError> {
        match self.peek().clone() {
            Token::Word(w) if !KEYWORDS.contains(&w.as_str()) => {
                self.advance();
                Ok(w)
            }
            other => Err(self.err(format!("expected identifier, got {:?}", other))),
        }
    }

    /// `(a, b, c)` -- used by explicit dependency lists.
    fn parse_ident_list(&mut self) -> Result<Vec<String>, LowerError> {
        self.expect(Token::LParen, "(")?;
        let mut names = Vec::new();
        while self.peek() != &Token::RParen {
            names.push(self.take_ident()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen, ")")?;
        Ok(names)
    }

    fn enter(&mut self) -> Result<(), LowerError> {
        if self.guard.enter() {
            Ok(())
        } else {
            Err(self.err(format!(
                "syntax nesting exceeds the limit of {}",
                self.guard.limit()
            )))
        }
    }

    fn exit(&mut self) {
        self.guard.exit();
    }

    /// Enter one more level for a node built in a loop; `unwind` leaves them all.
    fn wrap(&mut self, wraps: &mut usize) -> Result<(), LowerError> {
        self.enter()?;
        *wraps += 1;
        Ok(())
    }

    fn unwind(&mut self, wraps: usize) {
        for _ in 0..wraps {
            self.guard.exit();
        }
    }

    // -- Top level ------------------------------------------------

    fn parse_file(&mut self) -> Result<Program, LowerError> {
        let mut body = Vec::new();
        while self.peek() != &Token::Eof {
            if self.eat(&Token::Semi) {
                continue;
            }
            body.push(self.parse_stmt()?);
        }
        Ok(Program {
            file: self.filename.clone(),
            body,
        })
    }
}

pub fn parse(tokens: &[Spanned], filename: &str, config: &LoweringConfig) -> Result<Program, LowerError> {
    let mut p = Parser::new(tokens, filename, config.max_tree_depth);
    p.parse_file()
}

/// Lex and parse a source string.
pub fn read_source(src: &str, filename: &str, config: &LoweringConfig) -> Result<Program, LowerError> {
    let tokens = lexer::lex(src, filename)?;
    parse(&tokens, filename, config)
}

/// Parse in multi-error recovery mode.
///
/// Returns successfully-parsed top-level statements plus accumulated
/// errors. The parser recovers at statement boundaries: after an error it
/// skips to the next `;` or `let` at brace depth zero.
pub fn parse_recovering(
    tokens: &[Spanned],
    filename: &str,
    config: &LoweringConfig,
) -> (Program, Vec<LowerError>) {
    let mut p = Parser::new(tokens, filename, config.max_tree_depth);
    p.parse_file_recovering(config.max_errors)
}

impl<'a> Parser<'a> {
    /// Skip tokens until a statement boundary at brace depth zero.
    fn recover_to_next_statement(&mut self) {
        let mut depth: i32 = 0;
        loop {
            match self.peek() {
                Token::Eof => break,
                Token::LBrace | Token::LParen | Token::LBracket => {
                    depth += 1;
                    self.advance();
                }
                Token::RBrace | Token::RParen | Token::RBracket => {
                    depth -= 1;
                    self.advance();
                }
                Token::Semi if depth <= 0 => {
                    self.advance();
                    break;
                }
                _ => {
                    if depth <= 0 && self.is_word("let") {
                        break;
                    }
                    self.advance();
                }
            }
        }
    }

    fn parse_file_recovering(&mut self, max_errors: usize) -> (Program, Vec<LowerError>) {
        let mut body: Vec<Stmt> = Vec::new();
        let mut errors = Vec::new();

        while self.peek() != &Token::Eof {
            if self.eat(&Token::Semi) {
                continue;
            }
            let start = self.pos;
            match self.parse_stmt() {
                Ok(s) => body.push(s),
                Err(e) => {
                    errors.push(e);
                    if errors.len() >= max_errors {
                        break;
                    }
                    self.guard = DepthGuard::new(self.guard.limit());
                    self.recover_to_next_statement();
                    // A failure on a leading `let` must still make progress.
                    if self.pos == start {
                        self.advance();
                    }
                }
            }
        }

        (
            Program {
                file: self.filename.clone(),
                body,
            },
            errors,
        )
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
