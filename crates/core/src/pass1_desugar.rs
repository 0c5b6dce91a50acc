//! Pass 1: Shorthand desugaring -- rewrite creation and chain-creation
//! declarations into plain `let` bindings of canonical contexts, dedupe
//! explicit dependency lists, and name anonymous catch parameters.
//!
//! After this pass no `Create` or `ChainCreate` node remains anywhere in
//! the tree.

use crate::ast::*;
use crate::config::{DepthGuard, LoweringConfig};
use crate::error::{ErrorKind, LowerError};
use crate::names::NameGen;
use tracing::debug;

const PASS: u8 = 1;

/// Desugar one top-level declaration. A chain-creation declaration
/// expands to several top-level bindings, so the result is a list.
pub fn desugar_declaration(
    stmt: Stmt,
    names: &mut NameGen,
    config: &LoweringConfig,
) -> Result<Vec<Stmt>, LowerError> {
    let mut d = Desugarer {
        names,
        guard: DepthGuard::new(config.max_tree_depth),
    };
    d.stmt(stmt)
}

struct Desugarer<'a> {
    names: &'a mut NameGen,
    guard: DepthGuard,
}

/// `let name = @ => body` produced by creation shorthand.
fn creation(name: String, body: Expr, prov: Provenance) -> Stmt {
    Stmt::Let {
        name,
        value: Expr::Context(Box::new(ContextExpr {
            id: None,
            origin: ContextOrigin::Creation,
            deps: None,
            body: Body::Expr(Box::new(body)),
            prov: prov.clone(),
        })),
        prov,
    }
}

impl<'a> Desugarer<'a> {
    fn enter(&mut self, prov: &Provenance) -> Result<(), LowerError> {
        if self.guard.enter() {
            Ok(())
        } else {
            Err(LowerError::new(
                PASS,
                ErrorKind::ContextNestingTooDeep,
                prov,
                format!(
                    "functions and contexts nest deeper than the limit of {}",
                    self.guard.limit()
                ),
            ))
        }
    }

    fn stmt(&mut self, stmt: Stmt) -> Result<Vec<Stmt>, LowerError> {
        match stmt {
            Stmt::Let { name, value, prov } => {
                let value = self.expr(value, &prov)?;
                Ok(vec![Stmt::Let { name, value, prov }])
            }
            Stmt::Assign { name, value, prov } => {
                let value = self.expr(value, &prov)?;
                Ok(vec![Stmt::Assign { name, value, prov }])
            }
            Stmt::Create { name, value, prov } => {
                let value = self.expr(value, &prov)?;
                Ok(vec![creation(name, value, prov)])
            }
            Stmt::ChainCreate {
                markers,
                target,
                value,
                prov,
            } => {
                let name = match target {
                    Expr::Ident(name) if markers > 0 => name,
                    Expr::Ident(_) => {
                        return Err(LowerError::new(
                            PASS,
                            ErrorKind::MalformedChainShorthand,
                            &prov,
                            "chain-creation shorthand needs at least one marker",
                        ))
                    }
                    other => {
                        return Err(LowerError::new(
                            PASS,
                            ErrorKind::MalformedChainShorthand,
                            &prov,
                            format!(
                                "chain-creation target must be a plain identifier, got '{}'",
                                other
                            ),
                        ))
                    }
                };
                let value = self.expr(value, &prov)?;
                Ok(self.expand_chain(name, markers, value, prov))
            }
            Stmt::Expr(e) => {
                let prov = Provenance::synthetic();
                Ok(vec![Stmt::Expr(self.expr(e, &prov)?)])
            }
            Stmt::Return(Some(e)) => {
                let prov = Provenance::synthetic();
                Ok(vec![Stmt::Return(Some(self.expr(e, &prov)?))])
            }
            Stmt::Return(None) => Ok(vec![Stmt::Return(None)]),
        }
    }

    /// `let @@..@name = E` with k markers: hidden `name$1 = @ => E`, then
    /// each step `@ => @@previous`, the last one bound to `name`.
    fn expand_chain(&mut self, name: String, markers: u32, value: Expr, prov: Provenance) -> Vec<Stmt> {
        if markers == 1 {
            return vec![creation(name, value, prov)];
        }
        let mut out = Vec::with_capacity(markers as usize);
        let mut previous = self.names.fresh(&format!("{}$1", name));
        out.push(creation(previous.clone(), value, prov.clone()));
        for step in 2..=markers {
            let binding = if step == markers {
                name.clone()
            } else {
                self.names.fresh(&format!("{}${}", name, step))
            };
            let flatten = Expr::Flatten(FlattenExpr {
                target: previous,
                depth: 2,
                nullish: false,
                prov: prov.clone(),
            });
            out.push(creation(binding.clone(), flatten, prov.clone()));
            previous = binding;
        }
        debug!(name = %name, markers, "expanded chain-creation shorthand");
        out
    }

    fn block(&mut self, stmts: Vec<Stmt>) -> Result<Vec<Stmt>, LowerError> {
        let mut out = Vec::with_capacity(stmts.len());
        for s in stmts {
            out.extend(self.stmt(s)?);
        }
        Ok(out)
    }

    fn body(&mut self, body: Body, prov: &Provenance) -> Result<Body, LowerError> {
        match body {
            Body::Expr(e) => Ok(Body::Expr(Box::new(self.expr(*e, prov)?))),
            Body::Block(stmts) => Ok(Body::Block(self.block(stmts)?)),
        }
    }

    fn boxed(&mut self, e: Box<Expr>, prov: &Provenance) -> Result<Box<Expr>, LowerError> {
        Ok(Box::new(self.expr(*e, prov)?))
    }

    fn list(&mut self, items: Vec<Expr>, prov: &Provenance) -> Result<Vec<Expr>, LowerError> {
        items.into_iter().map(|e| self.expr(e, prov)).collect()
    }

    /// `prov` is the nearest enclosing located node, used for depth errors.
    fn expr(&mut self, expr: Expr, prov: &Provenance) -> Result<Expr, LowerError> {
        if !expr.opens_scope() {
            return self.expr_inner(expr, prov);
        }
        self.enter(prov)?;
        let result = self.expr_inner(expr, prov);
        self.guard.exit();
        result
    }

    fn expr_inner(&mut self, expr: Expr, prov: &Provenance) -> Result<Expr, LowerError> {
        Ok(match expr {
            e @ (Expr::Literal(_) | Expr::Ident(_)) => e,
            Expr::Flatten(site) => {
                // Each extra marker becomes one nested switch in the pipeline.
                if site.depth as usize > self.guard.limit() {
                    return Err(LowerError::new(
                        PASS,
                        ErrorKind::ContextNestingTooDeep,
                        &site.prov,
                        format!(
                            "{} stacked flatten markers exceed the limit of {}",
                            site.depth,
                            self.guard.limit()
                        ),
                    ));
                }
                Expr::Flatten(site)
            }
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: self.boxed(operand, prov)?,
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: self.boxed(left, prov)?,
                right: self.boxed(right, prov)?,
            },
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => Expr::Conditional {
                test: self.boxed(test, prov)?,
                consequent: self.boxed(consequent, prov)?,
                alternate: self.boxed(alternate, prov)?,
            },
            Expr::Call { callee, args } => Expr::Call {
                callee: self.boxed(callee, prov)?,
                args: self.list(args, prov)?,
            },
            Expr::Member { object, property } => Expr::Member {
                object: self.boxed(object, prov)?,
                property,
            },
            Expr::Index { object, index } => Expr::Index {
                object: self.boxed(object, prov)?,
                index: self.boxed(index, prov)?,
            },
            Expr::Array(items) => Expr::Array(self.list(items, prov)?),
            Expr::Arrow(func) => {
                let Function { params, body } = *func;
                Expr::arrow(params, self.body(body, prov)?)
            }
            Expr::Context(ctx) => {
                let ContextExpr {
                    id,
                    origin,
                    deps,
                    body,
                    prov,
                } = *ctx;
                let body = self.body(body, &prov)?;
                Expr::Context(Box::new(ContextExpr {
                    id,
                    origin,
                    deps: deps.map(|d| dedupe_deps(d, &prov)),
                    body,
                    prov,
                }))
            }
            Expr::Observe(obs) => {
                let ObserveExpr {
                    id,
                    deps,
                    body,
                    catch,
                    finally,
                    prov,
                } = *obs;
                let body = self.block(body)?;
                let catch = match catch {
                    Some(c) => Some(CatchClause {
                        param: Some(c.param.unwrap_or_else(|| self.names.fresh("error"))),
                        body: self.block(c.body)?,
                    }),
                    None => None,
                };
                let finally = match finally {
                    Some(f) => Some(self.block(f)?),
                    None => None,
                };
                Expr::Observe(Box::new(ObserveExpr {
                    id,
                    deps: deps.map(|d| dedupe_deps(d, &prov)),
                    body,
                    catch,
                    finally,
                    prov,
                }))
            }
        })
    }
}

/// Keep the first occurrence of each listed dependency.
fn dedupe_deps(deps: Vec<String>, prov: &Provenance) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(deps.len());
    for d in deps {
        if out.contains(&d) {
            debug!(dependency = %d, line = prov.line, "dropping repeated explicit dependency");
        } else {
            out.push(d);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::read_source;

    fn desugar(src: &str) -> Result<Vec<Stmt>, LowerError> {
        let config = LoweringConfig::default();
        let program = read_source(src, "d.obs", &config).unwrap();
        let mut names = NameGen::for_program(&program);
        let mut out = Vec::new();
        for s in program.body {
            out.extend(desugar_declaration(s, &mut names, &config)?);
        }
        Ok(out)
    }

    fn render(stmts: &[Stmt]) -> Vec<String> {
        stmts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn creation_becomes_let_of_context() {
        let out = desugar("let @doubled = @a * 2;").unwrap();
        assert_eq!(render(&out), vec!["let doubled = @ => @a * 2;"]);
        match &out[0] {
            Stmt::Let {
                value: Expr::Context(ctx),
                ..
            } => assert_eq!(ctx.origin, ContextOrigin::Creation),
            other => panic!("expected context binding, got {:?}", other),
        }
    }

    #[test]
    fn chain_creation_expands_into_hidden_bindings() {
        let out = desugar("let @@@latest = @sources;").unwrap();
        assert_eq!(
            render(&out),
            vec![
                "let latest$1 = @ => @sources;",
                "let latest$2 = @ => @@latest$1;",
                "let latest = @ => @@latest$2;",
            ]
        );
    }

    #[test]
    fn two_markers_flatten_the_hidden_binding_once() {
        let out = desugar("let @@x = 1;").unwrap();
        assert_eq!(render(&out), vec!["let x$1 = @ => 1;", "let x = @ => @@x$1;"]);
    }

    #[test]
    fn chain_with_one_marker_is_plain_creation() {
        let stmt = Stmt::ChainCreate {
            markers: 1,
            target: Expr::ident("x"),
            value: Expr::ident("y"),
            prov: Provenance::new("d.obs", 1, 1),
        };
        let mut names = NameGen::default();
        let out = desugar_declaration(stmt, &mut names, &LoweringConfig::default()).unwrap();
        assert_eq!(render(&out), vec!["let x = @ => y;"]);
    }

    #[test]
    fn chain_target_must_be_identifier() {
        let err = desugar("let @@a.b = 1;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedChainShorthand);
        assert_eq!(err.pass, 1);
        assert_eq!((err.line, err.column), (1, 1));
    }

    #[test]
    fn zero_markers_is_malformed() {
        let stmt = Stmt::ChainCreate {
            markers: 0,
            target: Expr::ident("x"),
            value: Expr::Literal(Literal::Int(1)),
            prov: Provenance::new("d.obs", 3, 1),
        };
        let mut names = NameGen::default();
        let err = desugar_declaration(stmt, &mut names, &LoweringConfig::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedChainShorthand);
        assert_eq!(err.line, 3);
    }

    #[test]
    fn nested_creation_inside_context_block() {
        let out = desugar("let o = @ => { let @s = f(); return @s; };").unwrap();
        assert_eq!(
            render(&out),
            vec!["let o = @ => { let s = @ => f(); return @s; };"]
        );
    }

    #[test]
    fn catch_parameter_is_named_and_deps_deduped() {
        let out = desugar("observe(a, b, a) { f(@a); } catch { g(); }").unwrap();
        assert_eq!(
            render(&out),
            vec!["observe(a, b) { f(@a); } catch (error) { g(); };"]
        );
    }
}
