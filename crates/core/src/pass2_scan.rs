//! Pass 2: Context scanning -- assign every observable context an id,
//! record the contexts of a declaration innermost-first, and collect
//! flatten markers that sit outside every context.
//!
//! Unresolved flatten sites are not errors here; the resolver reports
//! them (see `pass3_resolve::check_unresolved`).

use crate::ast::*;
use crate::config::{DepthGuard, LoweringConfig};
use crate::error::{ErrorKind, LowerError};
use serde::Serialize;
use tracing::{debug, trace};

const PASS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Arrow,
    Creation,
    Observation,
}

impl ContextKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextKind::Arrow => "arrow",
            ContextKind::Creation => "creation",
            ContextKind::Observation => "observation",
        }
    }
}

/// One observable context found by the scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextRecord {
    pub id: ContextId,
    pub kind: ContextKind,
    /// Nesting level; 1 for a context with no enclosing context
    pub depth: usize,
    pub parent: Option<ContextId>,
    pub explicit: Option<Vec<String>>,
    pub prov: Provenance,
}

/// A flatten marker application, as recorded by the scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenSite {
    pub target: String,
    pub depth: u32,
    pub nullish: bool,
    pub prov: Provenance,
}

impl From<&FlattenExpr> for FlattenSite {
    fn from(f: &FlattenExpr) -> Self {
        FlattenSite {
            target: f.target.clone(),
            depth: f.depth,
            nullish: f.nullish,
            prov: f.prov.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Innermost-first (post-order) list of contexts.
    pub contexts: Vec<ContextRecord>,
    /// Flatten sites with no enclosing context.
    pub unresolved: Vec<FlattenSite>,
}

/// Scan the statements of one (desugared) top-level declaration.
/// `next_id` is the program-wide context counter.
pub fn scan_declaration(
    stmts: &mut [Stmt],
    next_id: &mut u32,
    config: &LoweringConfig,
) -> Result<ScanResult, LowerError> {
    let mut s = Scanner {
        next_id,
        stack: Vec::new(),
        max_context_depth: config.max_context_depth,
        guard: DepthGuard::new(config.max_tree_depth),
        result: ScanResult::default(),
    };
    for stmt in stmts.iter_mut() {
        s.stmt(stmt)?;
    }
    Ok(s.result)
}

struct Scanner<'a> {
    next_id: &'a mut u32,
    stack: Vec<ContextId>,
    max_context_depth: usize,
    guard: DepthGuard,
    result: ScanResult,
}

impl<'a> Scanner<'a> {
    fn fresh_id(&mut self) -> ContextId {
        let id = ContextId(*self.next_id);
        *self.next_id += 1;
        id
    }

    /// Open a context: assign its id and check the nesting guard.
    fn open(&mut self, prov: &Provenance) -> Result<ContextId, LowerError> {
        let id = self.fresh_id();
        if self.stack.len() >= self.max_context_depth {
            return Err(LowerError::new(
                PASS,
                ErrorKind::ContextNestingTooDeep,
                prov,
                format!(
                    "observable contexts nest deeper than the limit of {}",
                    self.max_context_depth
                ),
            )
            .in_context(id));
        }
        self.stack.push(id);
        Ok(id)
    }

    /// Close the innermost context and record it.
    fn close(&mut self, id: ContextId, kind: ContextKind, explicit: Option<Vec<String>>, prov: &Provenance) {
        let depth = self.stack.len();
        self.stack.pop();
        let parent = self.stack.last().copied();
        debug!(context = %id, kind = kind.as_str(), depth, "scanned context");
        self.result.contexts.push(ContextRecord {
            id,
            kind,
            depth,
            parent,
            explicit,
            prov: prov.clone(),
        });
    }

    fn stmt(&mut self, stmt: &mut Stmt) -> Result<(), LowerError> {
        match stmt {
            Stmt::Let { value, prov, .. } | Stmt::Assign { value, prov, .. } => {
                let prov = prov.clone();
                self.expr(value, &prov)
            }
            Stmt::Create { prov, .. } | Stmt::ChainCreate { prov, .. } => Err(LowerError::internal(
                PASS,
                prov,
                "creation shorthand reached the scanner without desugaring",
            )),
            Stmt::Expr(e) | Stmt::Return(Some(e)) => self.expr(e, &Provenance::synthetic()),
            Stmt::Return(None) => Ok(()),
        }
    }

    fn block(&mut self, stmts: &mut [Stmt]) -> Result<(), LowerError> {
        for s in stmts.iter_mut() {
            self.stmt(s)?;
        }
        Ok(())
    }

    fn body(&mut self, body: &mut Body, prov: &Provenance) -> Result<(), LowerError> {
        match body {
            Body::Expr(e) => self.expr(e, prov),
            Body::Block(stmts) => self.block(stmts),
        }
    }

    fn expr(&mut self, expr: &mut Expr, prov: &Provenance) -> Result<(), LowerError> {
        if !expr.opens_scope() {
            return self.expr_inner(expr, prov);
        }
        if !self.guard.enter() {
            return Err(LowerError::new(
                PASS,
                ErrorKind::ContextNestingTooDeep,
                prov,
                format!(
                    "functions and contexts nest deeper than the limit of {}",
                    self.guard.limit()
                ),
            ));
        }
        let result = self.expr_inner(expr, prov);
        self.guard.exit();
        result
    }

    fn expr_inner(&mut self, expr: &mut Expr, prov: &Provenance) -> Result<(), LowerError> {
        match expr {
            Expr::Literal(_) | Expr::Ident(_) => Ok(()),
            Expr::Flatten(site) => {
                if self.stack.is_empty() {
                    trace!(target_ident = %site.target, line = site.prov.line, "flatten outside any context");
                    self.result.unresolved.push(FlattenSite::from(&*site));
                }
                Ok(())
            }
            Expr::Unary { operand, .. } => self.expr(operand, prov),
            Expr::Binary { left, right, .. } => {
                self.expr(left, prov)?;
                self.expr(right, prov)
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test, prov)?;
                self.expr(consequent, prov)?;
                self.expr(alternate, prov)
            }
            Expr::Call { callee, args } => {
                self.expr(callee, prov)?;
                for a in args.iter_mut() {
                    self.expr(a, prov)?;
                }
                Ok(())
            }
            Expr::Member { object, .. } => self.expr(object, prov),
            Expr::Index { object, index } => {
                self.expr(object, prov)?;
                self.expr(index, prov)
            }
            Expr::Array(items) => {
                for i in items.iter_mut() {
                    self.expr(i, prov)?;
                }
                Ok(())
            }
            Expr::Arrow(func) => self.body(&mut func.body, prov),
            Expr::Context(ctx) => {
                let id = self.open(&ctx.prov)?;
                ctx.id = Some(id);
                let prov = ctx.prov.clone();
                self.body(&mut ctx.body, &prov)?;
                let kind = match ctx.origin {
                    ContextOrigin::Arrow => ContextKind::Arrow,
                    ContextOrigin::Creation => ContextKind::Creation,
                };
                self.close(id, kind, ctx.deps.clone(), &prov);
                Ok(())
            }
            Expr::Observe(obs) => {
                let id = self.open(&obs.prov)?;
                obs.id = Some(id);
                self.block(&mut obs.body)?;
                // Handlers run outside the block's own context.
                let depth = self.stack.len();
                self.stack.pop();
                if let Some(catch) = obs.catch.as_mut() {
                    self.block(&mut catch.body)?;
                }
                if let Some(finally) = obs.finally.as_mut() {
                    self.block(finally)?;
                }
                let parent = self.stack.last().copied();
                debug!(context = %id, kind = "observation", depth, "scanned context");
                self.result.contexts.push(ContextRecord {
                    id,
                    kind: ContextKind::Observation,
                    depth,
                    parent,
                    explicit: obs.deps.clone(),
                    prov: obs.prov.clone(),
                });
                Ok(())
            }
        }
    }
}
