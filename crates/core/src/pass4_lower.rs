//! Pass 4: Lowering -- rewrite each context, innermost first, into a
//! `combine(...)` pipeline over its adapted dependencies.
//!
//! The driver walks a declaration post-order with an explicit scope
//! chain. At each context it lowers the body first (so nested contexts
//! are opaque expressions by the time the parent is resolved), checks
//! the context against the scanner's innermost-first order, resolves it
//! (pass 3) and replaces the node in place.

use crate::ast::*;
use crate::config::{DepthGuard, LoweringConfig, OperatorNames};
use crate::error::{ErrorKind, LowerError};
use crate::names::NameGen;
use crate::pass2_scan::{ContextRecord, ScanResult};
use crate::pass3_resolve::{resolve_context, resolve_observation, DependencyTable};
use crate::scope::{block_declarations, FrameKind, ScopeChain};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

const PASS: u8 = 4;

/// A context that has been resolved and rewritten.
#[derive(Debug, Clone)]
pub struct LoweredContext {
    pub record: ContextRecord,
    pub dependencies: DependencyTable,
}

/// `ident.flattenLatest()` applied `depth - 1` times, then
/// `.defaultUntilFirst()` when nullish.
pub fn chain_adapt(ident: &str, depth: u32, nullish: bool, ops: &OperatorNames) -> Expr {
    let mut source = Expr::ident(ident);
    for _ in 1..depth {
        source = Expr::method(source, &ops.flatten_latest, vec![]);
    }
    if nullish {
        source = Expr::method(source, &ops.default_until_first, vec![]);
    }
    source
}

/// Fresh slot parameter names, one per dependency, in slot order.
fn slot_params(table: &DependencyTable, names: &mut NameGen) -> Vec<String> {
    table
        .entries()
        .iter()
        .map(|d| names.fresh(&format!("${}", d.key.ident)))
        .collect()
}

fn combine_call(table: &DependencyTable, ops: &OperatorNames) -> Expr {
    let sources = table
        .entries()
        .iter()
        .map(|d| chain_adapt(&d.key.ident, d.key.depth, d.key.nullish, ops))
        .collect();
    Expr::call(Expr::ident(&ops.combine), sources)
}

/// Lower a resolved context to
/// `combine(adapted...).transform(([$a, ...]) => body)`.
pub fn lower_context(
    ctx: &ContextExpr,
    table: &DependencyTable,
    names: &mut NameGen,
    ops: &OperatorNames,
) -> Result<Expr, LowerError> {
    let params = slot_params(table, names);
    let mut body = ctx.body.clone();
    substitute_body(&mut body, table, &params)?;
    let transform = Expr::arrow(vec![Param::Tuple(params)], body);
    Ok(Expr::method(
        combine_call(table, ops),
        &ops.transform,
        vec![transform],
    ))
}

/// Lower a resolved observation block to
/// `combine(adapted...).subscribe(next, error, complete)`.
pub fn lower_observation(
    obs: &ObserveExpr,
    table: &DependencyTable,
    names: &mut NameGen,
    ops: &OperatorNames,
) -> Result<Expr, LowerError> {
    let params = slot_params(table, names);
    let mut body = Body::Block(obs.body.clone());
    substitute_body(&mut body, table, &params)?;
    let mut handlers = vec![Expr::arrow(vec![Param::Tuple(params)], body)];
    match (&obs.catch, &obs.finally) {
        (Some(catch), _) => {
            let param = catch.param.clone().unwrap_or_else(|| names.fresh("error"));
            handlers.push(Expr::arrow(
                vec![Param::Name(param)],
                Body::Block(catch.body.clone()),
            ));
        }
        (None, Some(_)) => handlers.push(Expr::Literal(Literal::Null)),
        (None, None) => {}
    }
    if let Some(finally) = &obs.finally {
        handlers.push(Expr::arrow(vec![], Body::Block(finally.clone())));
    }
    Ok(Expr::method(combine_call(table, ops), &ops.subscribe, handlers))
}

// ──────────────────────────────────────────────
// Flatten-site substitution
// ──────────────────────────────────────────────

fn substitute_body(body: &mut Body, table: &DependencyTable, params: &[String]) -> Result<(), LowerError> {
    match body {
        Body::Expr(e) => substitute(e, table, params),
        Body::Block(stmts) => substitute_block(stmts, table, params),
    }
}

fn substitute_block(stmts: &mut [Stmt], table: &DependencyTable, params: &[String]) -> Result<(), LowerError> {
    for s in stmts.iter_mut() {
        match s {
            Stmt::Let { value, .. } | Stmt::Assign { value, .. } => substitute(value, table, params)?,
            Stmt::Expr(e) | Stmt::Return(Some(e)) => substitute(e, table, params)?,
            Stmt::Return(None) => {}
            Stmt::Create { prov, .. } | Stmt::ChainCreate { prov, .. } => {
                return Err(LowerError::internal(PASS, prov, "creation shorthand reached lowering"))
            }
        }
    }
    Ok(())
}

/// Replace every flatten site with its slot parameter.
fn substitute(expr: &mut Expr, table: &DependencyTable, params: &[String]) -> Result<(), LowerError> {
    let replacement = match expr {
        Expr::Flatten(site) => {
            let slot = table.slot_of(site).ok_or_else(|| {
                LowerError::internal(
                    PASS,
                    &site.prov,
                    format!("flatten of '{}' has no dependency slot", site.target),
                )
            })?;
            Some(Expr::Ident(params[slot].clone()))
        }
        Expr::Literal(_) | Expr::Ident(_) => None,
        Expr::Unary { operand, .. } => {
            substitute(operand, table, params)?;
            None
        }
        Expr::Binary { left, right, .. } => {
            substitute(left, table, params)?;
            substitute(right, table, params)?;
            None
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            substitute(test, table, params)?;
            substitute(consequent, table, params)?;
            substitute(alternate, table, params)?;
            None
        }
        Expr::Call { callee, args } => {
            substitute(callee, table, params)?;
            for a in args.iter_mut() {
                substitute(a, table, params)?;
            }
            None
        }
        Expr::Member { object, .. } => {
            substitute(object, table, params)?;
            None
        }
        Expr::Index { object, index } => {
            substitute(object, table, params)?;
            substitute(index, table, params)?;
            None
        }
        Expr::Array(items) => {
            for i in items.iter_mut() {
                substitute(i, table, params)?;
            }
            None
        }
        Expr::Arrow(func) => {
            substitute_body(&mut func.body, table, params)?;
            None
        }
        Expr::Context(ctx) => {
            return Err(LowerError::internal(PASS, &ctx.prov, "nested context reached substitution"))
        }
        Expr::Observe(obs) => {
            return Err(LowerError::internal(
                PASS,
                &obs.prov,
                "nested observation block reached substitution",
            ))
        }
    };
    if let Some(r) = replacement {
        *expr = r;
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Driver
// ──────────────────────────────────────────────

/// Lower every context in one declaration, innermost first. `module`
/// holds the program's top-level bindings; `scan` is the scanner's
/// result for these statements.
pub fn lower_declaration(
    stmts: &mut [Stmt],
    scan: &ScanResult,
    module: &ScopeChain,
    names: &mut NameGen,
    config: &LoweringConfig,
) -> Result<Vec<LoweredContext>, LowerError> {
    let mut d = Driver {
        chain: module.clone(),
        names,
        ops: &config.operators,
        order: &scan.contexts,
        cursor: 0,
        resolved: HashSet::new(),
        guard: DepthGuard::new(config.max_tree_depth),
        lowered: Vec::new(),
    };
    for s in stmts.iter_mut() {
        d.stmt(s)?;
    }
    if d.cursor != d.order.len() {
        let prov = &d.order[d.cursor].prov;
        return Err(LowerError::internal(
            PASS,
            prov,
            format!("context {} was scanned but never lowered", d.order[d.cursor].id),
        ));
    }
    Ok(d.lowered)
}

struct Driver<'a> {
    chain: ScopeChain,
    names: &'a mut NameGen,
    ops: &'a OperatorNames,
    order: &'a [ContextRecord],
    cursor: usize,
    resolved: HashSet<ContextId>,
    guard: DepthGuard,
    lowered: Vec<LoweredContext>,
}

impl<'a> Driver<'a> {
    /// The next context to lower must be `id`, and must not have been
    /// lowered before.
    fn claim(&mut self, id: Option<ContextId>, prov: &Provenance) -> Result<ContextRecord, LowerError> {
        let id = id.ok_or_else(|| LowerError::internal(PASS, prov, "context reached lowering without an id"))?;
        if !self.resolved.insert(id) {
            return Err(LowerError::internal(
                PASS,
                prov,
                format!("context {} was lowered twice", id),
            )
            .in_context(id));
        }
        match self.order.get(self.cursor) {
            Some(record) if record.id == id => {
                self.cursor += 1;
                Ok(record.clone())
            }
            _ => Err(LowerError::internal(
                PASS,
                prov,
                format!("context {} lowered out of innermost-first order", id),
            )
            .in_context(id)),
        }
    }

    fn stmt(&mut self, stmt: &mut Stmt) -> Result<(), LowerError> {
        match stmt {
            Stmt::Let { value, .. } | Stmt::Assign { value, .. } => self.expr(value),
            Stmt::Expr(e) | Stmt::Return(Some(e)) => self.expr(e),
            Stmt::Return(None) => Ok(()),
            Stmt::Create { prov, .. } | Stmt::ChainCreate { prov, .. } => Err(LowerError::internal(
                PASS,
                prov,
                "creation shorthand reached lowering",
            )),
        }
    }

    fn block(&mut self, stmts: &mut [Stmt]) -> Result<(), LowerError> {
        self.chain.push(FrameKind::Block, block_declarations(stmts));
        let result = stmts.iter_mut().try_for_each(|s| self.stmt(s));
        self.chain.pop();
        result
    }

    fn body(&mut self, body: &mut Body) -> Result<(), LowerError> {
        match body {
            Body::Expr(e) => self.expr(e),
            Body::Block(stmts) => self.block(stmts),
        }
    }

    fn expr(&mut self, expr: &mut Expr) -> Result<(), LowerError> {
        if !expr.opens_scope() {
            return self.expr_inner(expr);
        }
        if !self.guard.enter() {
            return Err(LowerError::new(
                PASS,
                ErrorKind::ContextNestingTooDeep,
                &Provenance::synthetic(),
                format!(
                    "functions and contexts nest deeper than the limit of {}",
                    self.guard.limit()
                ),
            ));
        }
        let result = self.expr_inner(expr);
        self.guard.exit();
        result
    }

    fn expr_inner(&mut self, expr: &mut Expr) -> Result<(), LowerError> {
        let replacement = match expr {
            Expr::Literal(_) | Expr::Ident(_) | Expr::Flatten(_) => None,
            Expr::Unary { operand, .. } => {
                self.expr(operand)?;
                None
            }
            Expr::Binary { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)?;
                None
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test)?;
                self.expr(consequent)?;
                self.expr(alternate)?;
                None
            }
            Expr::Call { callee, args } => {
                self.expr(callee)?;
                args.iter_mut().try_for_each(|a| self.expr(a))?;
                None
            }
            Expr::Member { object, .. } => {
                self.expr(object)?;
                None
            }
            Expr::Index { object, index } => {
                self.expr(object)?;
                self.expr(index)?;
                None
            }
            Expr::Array(items) => {
                items.iter_mut().try_for_each(|i| self.expr(i))?;
                None
            }
            Expr::Arrow(func) => {
                let params: BTreeSet<String> = func
                    .params
                    .iter()
                    .flat_map(|p| p.names())
                    .map(str::to_owned)
                    .collect();
                self.chain.push(FrameKind::Function, params);
                let result = self.body(&mut func.body);
                self.chain.pop();
                result?;
                None
            }
            Expr::Context(ctx) => Some(self.context(ctx)?),
            Expr::Observe(obs) => Some(self.observation(obs)?),
        };
        if let Some(r) = replacement {
            *expr = r;
        }
        Ok(())
    }

    fn context(&mut self, ctx: &mut ContextExpr) -> Result<Expr, LowerError> {
        let frame = match ctx.id {
            Some(id) => FrameKind::Context(id),
            None => return Err(LowerError::internal(PASS, &ctx.prov, "context reached lowering without an id")),
        };
        self.chain.push(frame, BTreeSet::new());
        let result = self.body(&mut ctx.body);
        self.chain.pop();
        result?;

        let record = self.claim(ctx.id, &ctx.prov)?;
        let table = resolve_context(ctx, &self.chain)?;
        let lowered = lower_context(ctx, &table, self.names, self.ops)?;
        debug!(context = %record.id, kind = record.kind.as_str(), dependencies = table.len(), "lowered context");
        self.lowered.push(LoweredContext {
            record,
            dependencies: table,
        });
        Ok(lowered)
    }

    fn observation(&mut self, obs: &mut ObserveExpr) -> Result<Expr, LowerError> {
        let frame = match obs.id {
            Some(id) => FrameKind::Context(id),
            None => {
                return Err(LowerError::internal(
                    PASS,
                    &obs.prov,
                    "observation block reached lowering without an id",
                ))
            }
        };
        self.chain.push(frame, BTreeSet::new());
        let result = self.block(&mut obs.body);
        self.chain.pop();
        result?;

        // Handlers belong to the enclosing scope.
        if let Some(catch) = obs.catch.as_mut() {
            let param: BTreeSet<String> = catch.param.iter().cloned().collect();
            self.chain.push(FrameKind::Function, param);
            let result = self.block(&mut catch.body);
            self.chain.pop();
            result?;
        }
        if let Some(finally) = obs.finally.as_mut() {
            self.block(finally)?;
        }

        let record = self.claim(obs.id, &obs.prov)?;
        let table = resolve_observation(obs, &self.chain)?;
        let lowered = lower_observation(obs, &table, self.names, self.ops)?;
        debug!(context = %record.id, dependencies = table.len(), "lowered observation block");
        self.lowered.push(LoweredContext {
            record,
            dependencies: table,
        });
        Ok(lowered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::read_source;
    use crate::pass1_desugar::desugar_declaration;
    use crate::pass2_scan::scan_declaration;
    use crate::pass3_resolve::check_unresolved;

    fn lower(src: &str) -> Result<(Vec<String>, Vec<LoweredContext>), LowerError> {
        let config = LoweringConfig::default();
        let program = read_source(src, "l.obs", &config).unwrap();
        let mut names = NameGen::for_program(&program);
        let mut stmts = Vec::new();
        for s in program.body {
            stmts.extend(desugar_declaration(s, &mut names, &config)?);
        }
        let module = ScopeChain::module(block_declarations(&stmts));
        let mut next_id = 0;
        let scan = scan_declaration(&mut stmts, &mut next_id, &config)?;
        check_unresolved(&scan)?;
        let lowered = lower_declaration(&mut stmts, &scan, &module, &mut names, &config)?;
        Ok((stmts.iter().map(|s| s.to_string()).collect(), lowered))
    }

    fn text(src: &str) -> Vec<String> {
        lower(src).unwrap().0
    }

    #[test]
    fn chain_adapter_shape() {
        let ops = OperatorNames::default();
        assert_eq!(chain_adapt("a", 1, false, &ops).to_string(), "a");
        assert_eq!(
            chain_adapt("a", 3, true, &ops).to_string(),
            "a.flattenLatest().flattenLatest().defaultUntilFirst()"
        );
    }

    #[test]
    fn lowers_single_dependency() {
        assert_eq!(
            text("let o = @ => @a + 2;"),
            vec!["let o = combine(a).transform(([$a]) => $a + 2);"]
        );
    }

    #[test]
    fn repeated_sites_share_a_slot() {
        assert_eq!(
            text("let o = @ => @a + @b * @a;"),
            vec!["let o = combine(a, b).transform(([$a, $b]) => $a + $b * $a);"]
        );
    }

    #[test]
    fn depth_and_nullish_get_distinct_slots() {
        assert_eq!(
            text("let o = @ => [@a, @@a, @?a];"),
            vec!["let o = combine(a, a.flattenLatest(), a.defaultUntilFirst()).transform(([$a, $a_1, $a_2]) => [$a, $a_1, $a_2]);"]
        );
    }

    #[test]
    fn context_without_flatten_sites() {
        assert_eq!(
            text("let o = @ => 42;"),
            vec!["let o = combine().transform(([]) => 42);"]
        );
    }

    #[test]
    fn inner_contexts_are_lowered_first_and_stay_opaque() {
        let (out, lowered) = lower("let o = @ => @a + f(@ => @b);").unwrap();
        assert_eq!(
            out,
            vec!["let o = combine(a).transform(([$a]) => $a + f(combine(b).transform(([$b]) => $b)));"]
        );
        let ids: Vec<u32> = lowered.iter().map(|c| c.record.id.0).collect();
        assert_eq!(ids, vec![1, 0]);
        assert_eq!(lowered[0].record.parent, Some(ContextId(0)));
    }

    #[test]
    fn creation_shorthand_lowering() {
        assert_eq!(
            text("let @doubled = @a * 2;"),
            vec!["let doubled = combine(a).transform(([$a]) => $a * 2);"]
        );
    }

    #[test]
    fn chain_creation_lowering() {
        assert_eq!(
            text("let @@latest = @sources;"),
            vec![
                "let latest$1 = combine(sources).transform(([$sources]) => $sources);",
                "let latest = combine(latest$1.flattenLatest()).transform(([$latest$1]) => $latest$1);",
            ]
        );
    }

    #[test]
    fn observation_lowering_with_handlers() {
        assert_eq!(
            text("observe { log(@a); } catch (e) { report(e); } finally { done(); }"),
            vec!["combine(a).subscribe(([$a]) => { log($a); }, (e) => { report(e); }, () => { done(); });"]
        );
        assert_eq!(
            text("observe { log(@a); } finally { done(); }"),
            vec!["combine(a).subscribe(([$a]) => { log($a); }, null, () => { done(); });"]
        );
        assert_eq!(
            text("observe { log(@a); }"),
            vec!["combine(a).subscribe(([$a]) => { log($a); });"]
        );
    }

    #[test]
    fn flatten_in_catch_belongs_to_enclosing_context() {
        assert_eq!(
            text("let o = @ => observe { log(@a); } catch (e) { log(@b); };"),
            vec!["let o = combine(b).transform(([$b]) => combine(a).subscribe(([$a]) => { log($a); }, (e) => { log($b); }));"]
        );
    }

    #[test]
    fn inner_context_may_flatten_outer_context_locals() {
        let (out, lowered) = lower("let o = @ => { let s = @a; return @ => @s + 1; };").unwrap();
        assert_eq!(
            out,
            vec!["let o = combine(a).transform(([$a]) => { let s = $a; return combine(s).transform(([$s]) => $s + 1); });"]
        );
        let inner = &lowered[0].dependencies.entries()[0];
        assert_eq!(
            inner.binding,
            crate::scope::BindingSite::Local {
                context: Some(ContextId(0))
            }
        );
    }

    #[test]
    fn local_flatten_after_inner_creation_is_rejected() {
        let err = lower("let o = @ => { let @x = makeStream(); return @x + 1; };").unwrap_err();
        assert_eq!(err.kind, ErrorKind::LocalIdentifierFlatten);
        assert_eq!(err.pass, 3);
        assert_eq!(err.context, Some(ContextId(0)));
    }

    #[test]
    fn custom_operator_names() {
        let ops = OperatorNames {
            combine: "combineLatest".into(),
            transform: "map".into(),
            flatten_latest: "switchAll".into(),
            default_until_first: "startWithNull".into(),
            subscribe: "subscribe".into(),
        };
        let ctx = ContextExpr {
            id: Some(ContextId(0)),
            origin: ContextOrigin::Arrow,
            deps: None,
            body: Body::Expr(Box::new(Expr::Flatten(FlattenExpr {
                target: "a".into(),
                depth: 2,
                nullish: true,
                prov: Provenance::synthetic(),
            }))),
            prov: Provenance::synthetic(),
        };
        let table = resolve_context(&ctx, &ScopeChain::new()).unwrap();
        let mut names = NameGen::default();
        let out = lower_context(&ctx, &table, &mut names, &ops).unwrap();
        assert_eq!(
            out.to_string(),
            "combineLatest(a.switchAll().startWithNull()).map(([$a]) => $a)"
        );
    }
}
