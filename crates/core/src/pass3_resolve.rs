//! Pass 3: Dependency resolution -- validate every flatten site of one
//! context against that context's scope boundary and build its ordered,
//! de-duplicated dependency table.
//!
//! Contexts are resolved innermost-first. By the time a context reaches
//! this pass, every context nested in it has already been lowered, so its
//! body contains no context or observation nodes and any flatten site it
//! holds belongs to it.

use crate::ast::*;
use crate::error::{ErrorKind, LowerError};
use crate::pass2_scan::ScanResult;
use crate::scope::{block_declarations, BindingSite, FrameKind, ScopeBinding, ScopeChain};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, trace};

const PASS: u8 = 3;

/// Dependency identity: the same identifier at a different depth or with
/// a different nullish flag denotes a different derived stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DependencyKey {
    pub ident: String,
    pub depth: u32,
    pub nullish: bool,
}

impl From<&FlattenExpr> for DependencyKey {
    fn from(f: &FlattenExpr) -> Self {
        DependencyKey {
            ident: f.target.clone(),
            depth: f.depth,
            nullish: f.nullish,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dependency {
    #[serde(flatten)]
    pub key: DependencyKey,
    /// Position in the generated combine argument list
    pub slot: usize,
    pub binding: BindingSite,
    /// Number of flatten sites that collapsed into this entry
    pub occurrences: usize,
    #[serde(skip)]
    pub first_seen: Provenance,
}

/// Ordered dependency table of one context; first occurrence in a
/// pre-order walk fixes each entry's slot.
#[derive(Debug, Clone, Default)]
pub struct DependencyTable {
    entries: Vec<Dependency>,
    index: HashMap<DependencyKey, usize>,
}

impl DependencyTable {
    pub fn new() -> Self {
        DependencyTable::default()
    }

    /// Insert a site; returns its slot.
    pub fn insert(&mut self, site: &FlattenExpr, binding: BindingSite) -> usize {
        let key = DependencyKey::from(site);
        if let Some(&slot) = self.index.get(&key) {
            self.entries[slot].occurrences += 1;
            return slot;
        }
        let slot = self.entries.len();
        self.index.insert(key.clone(), slot);
        self.entries.push(Dependency {
            key,
            slot,
            binding,
            occurrences: 1,
            first_seen: site.prov.clone(),
        });
        slot
    }

    pub fn slot_of(&self, site: &FlattenExpr) -> Option<usize> {
        self.index.get(&DependencyKey::from(site)).copied()
    }

    pub fn entries(&self) -> &[Dependency] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &DependencyKey> {
        self.entries.iter().map(|d| &d.key)
    }
}

/// Report the first flatten site the scanner found outside every context.
pub fn check_unresolved(scan: &ScanResult) -> Result<(), LowerError> {
    match scan.unresolved.first() {
        Some(site) => Err(LowerError::new(
            PASS,
            ErrorKind::OutOfContextFlatten,
            &site.prov,
            format!(
                "flatten of '{}' is not inside an observable context",
                site.target
            ),
        )),
        None => Ok(()),
    }
}

/// Resolve a bare or creation context. `outer` is the scope chain at the
/// context's position, not including anything the context declares.
pub fn resolve_context(ctx: &ContextExpr, outer: &ScopeChain) -> Result<DependencyTable, LowerError> {
    let id = context_id(ctx.id, &ctx.prov)?;
    let mut r = Resolver::new(ScopeBinding::new(id, outer, ctx.deps.as_deref()));
    match &ctx.body {
        Body::Expr(e) => r.expr(e)?,
        Body::Block(stmts) => r.block(stmts)?,
    }
    debug!(context = %id, dependencies = r.table.len(), "resolved context");
    Ok(r.table)
}

/// Resolve the body of an observation block. Its catch and finally
/// handlers lie outside the block's context and are not visited.
pub fn resolve_observation(obs: &ObserveExpr, outer: &ScopeChain) -> Result<DependencyTable, LowerError> {
    let id = context_id(obs.id, &obs.prov)?;
    let mut r = Resolver::new(ScopeBinding::new(id, outer, obs.deps.as_deref()));
    r.block(&obs.body)?;
    debug!(context = %id, dependencies = r.table.len(), "resolved observation block");
    Ok(r.table)
}

fn context_id(id: Option<ContextId>, prov: &Provenance) -> Result<ContextId, LowerError> {
    id.ok_or_else(|| LowerError::internal(PASS, prov, "context reached the resolver without an id"))
}

struct Resolver<'a> {
    scope: ScopeBinding<'a>,
    table: DependencyTable,
}

impl<'a> Resolver<'a> {
    fn new(scope: ScopeBinding<'a>) -> Self {
        Resolver {
            scope,
            table: DependencyTable::new(),
        }
    }

    fn flatten(&mut self, site: &FlattenExpr) -> Result<(), LowerError> {
        let id = self.scope.context;
        if self.scope.is_local(&site.target) {
            return Err(LowerError::new(
                PASS,
                ErrorKind::LocalIdentifierFlatten,
                &site.prov,
                format!(
                    "'{}' is declared inside the context that flattens it",
                    site.target
                ),
            )
            .in_context(id));
        }
        if !self.scope.permits(&site.target) {
            let listed = self.scope.explicit().unwrap_or_default().join(", ");
            return Err(LowerError::new(
                PASS,
                ErrorKind::UndeclaredExplicitDependency,
                &site.prov,
                format!(
                    "'{}' is not in the explicit dependency list ({})",
                    site.target, listed
                ),
            )
            .in_context(id));
        }
        let binding = self.scope.outer_site(&site.target);
        let slot = self.table.insert(site, binding);
        trace!(context = %id, ident = %site.target, depth = site.depth, nullish = site.nullish, slot, "flatten site");
        Ok(())
    }

    fn block(&mut self, stmts: &[Stmt]) -> Result<(), LowerError> {
        self.scope.push(FrameKind::Block, block_declarations(stmts));
        let result = stmts.iter().try_for_each(|s| self.stmt(s));
        self.scope.pop();
        result
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), LowerError> {
        match stmt {
            Stmt::Let { value, .. } | Stmt::Assign { value, .. } => self.expr(value),
            Stmt::Create { prov, .. } | Stmt::ChainCreate { prov, .. } => Err(LowerError::internal(
                PASS,
                prov,
                "creation shorthand reached the resolver",
            )),
            Stmt::Expr(e) | Stmt::Return(Some(e)) => self.expr(e),
            Stmt::Return(None) => Ok(()),
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), LowerError> {
        match expr {
            Expr::Literal(_) | Expr::Ident(_) => Ok(()),
            Expr::Flatten(site) => self.flatten(site),
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Binary { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test)?;
                self.expr(consequent)?;
                self.expr(alternate)
            }
            Expr::Call { callee, args } => {
                self.expr(callee)?;
                args.iter().try_for_each(|a| self.expr(a))
            }
            Expr::Member { object, .. } => self.expr(object),
            Expr::Index { object, index } => {
                self.expr(object)?;
                self.expr(index)
            }
            Expr::Array(items) => items.iter().try_for_each(|i| self.expr(i)),
            Expr::Arrow(func) => {
                let params: BTreeSet<String> = func
                    .params
                    .iter()
                    .flat_map(|p| p.names())
                    .map(str::to_owned)
                    .collect();
                self.scope.push(FrameKind::Function, params);
                let result = match &func.body {
                    Body::Expr(e) => self.expr(e),
                    Body::Block(stmts) => self.block(stmts),
                };
                self.scope.pop();
                result
            }
            Expr::Context(ctx) => Err(LowerError::internal(
                PASS,
                &ctx.prov,
                "nested context was not lowered before its parent",
            )),
            Expr::Observe(obs) => Err(LowerError::internal(
                PASS,
                &obs.prov,
                "nested observation block was not lowered before its parent",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoweringConfig;
    use crate::parser::read_source;

    /// Parse `let o = <ctx>;`, give it an id and resolve it against a
    /// module scope holding `module`.
    fn resolve(src: &str, module: &[&str]) -> Result<DependencyTable, LowerError> {
        let program = read_source(src, "r.obs", &LoweringConfig::default()).unwrap();
        let outer = ScopeChain::module(module.iter().map(|s| s.to_string()).collect());
        match program.body.into_iter().next() {
            Some(Stmt::Let {
                value: Expr::Context(mut ctx),
                ..
            }) => {
                ctx.id = Some(ContextId(0));
                resolve_context(&ctx, &outer)
            }
            Some(Stmt::Expr(Expr::Observe(mut obs))) => {
                obs.id = Some(ContextId(0));
                resolve_observation(&obs, &outer)
            }
            other => panic!("unexpected test input {:?}", other),
        }
    }

    fn keys(table: &DependencyTable) -> Vec<(String, u32, bool)> {
        table
            .keys()
            .map(|k| (k.ident.clone(), k.depth, k.nullish))
            .collect()
    }

    #[test]
    fn first_occurrence_order_and_collapse() {
        let t = resolve("let o = @ => @b + @a * @b + @@a + @?a;", &["a", "b"]).unwrap();
        assert_eq!(
            keys(&t),
            vec![
                ("b".to_owned(), 1, false),
                ("a".to_owned(), 1, false),
                ("a".to_owned(), 2, false),
                ("a".to_owned(), 1, true),
            ]
        );
        assert_eq!(t.entries()[0].occurrences, 2);
        assert_eq!(t.entries()[3].slot, 3);
    }

    #[test]
    fn local_declaration_cannot_be_flattened() {
        let err = resolve("let o = @ => { let x = make(); return @x + 1; };", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::LocalIdentifierFlatten);
        assert_eq!(err.context, Some(ContextId(0)));
        assert_eq!((err.line, err.column), (1, 39));
    }

    #[test]
    fn arrow_parameter_inside_context_cannot_be_flattened() {
        let err = resolve("let o = @ => xs.map((v) => @v);", &["xs"]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::LocalIdentifierFlatten);
    }

    #[test]
    fn parameter_shadowing_ends_with_its_function() {
        let t = resolve("let o = @ => [((v) => v)(1), @v];", &["v"]).unwrap();
        assert_eq!(keys(&t), vec![("v".to_owned(), 1, false)]);
    }

    #[test]
    fn explicit_list_limits_flattening() {
        let t = resolve("let o = @(a) => @a + b;", &["a", "b"]).unwrap();
        assert_eq!(keys(&t), vec![("a".to_owned(), 1, false)]);

        let err = resolve("let o = @(a) => @a + @b;", &["a", "b"]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndeclaredExplicitDependency);
        assert!(err.message.contains("'b'"), "{}", err.message);
    }

    #[test]
    fn listed_but_unflattened_dependency_is_legal() {
        let t = resolve("let o = @(a, b) => b * 2;", &["a", "b"]).unwrap();
        assert!(t.is_empty());
    }

    #[test]
    fn binding_sites_are_classified() {
        let t = resolve("let o = @ => @a + @free;", &["a"]).unwrap();
        assert_eq!(t.entries()[0].binding, BindingSite::Module);
        assert_eq!(t.entries()[1].binding, BindingSite::Free);
    }

    #[test]
    fn observation_handlers_are_not_resolved() {
        let t = resolve("observe { log(@a); } catch (e) { log(e); }", &["a"]).unwrap();
        assert_eq!(keys(&t), vec![("a".to_owned(), 1, false)]);
    }

    #[test]
    fn unlowered_nested_context_is_internal() {
        let err = resolve("let o = @ => @ => 1;", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
