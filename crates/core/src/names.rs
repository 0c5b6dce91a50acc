//! Fresh identifiers for hidden chain bindings and positional slots.

use crate::ast::*;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct NameGen {
    used: HashSet<String>,
}

impl NameGen {
    /// A generator that avoids every identifier already in `program`.
    pub fn for_program(program: &Program) -> Self {
        let mut used = HashSet::new();
        collect_stmts(&program.body, &mut used);
        NameGen { used }
    }

    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_owned());
    }

    /// `base` if unused, otherwise `base_1`, `base_2`, ...
    pub fn fresh(&mut self, base: &str) -> String {
        if self.used.insert(base.to_owned()) {
            return base.to_owned();
        }
        let mut n = 1usize;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn collect_stmts(stmts: &[Stmt], out: &mut HashSet<String>) {
    for s in stmts {
        collect_stmt(s, out);
    }
}

fn collect_stmt(stmt: &Stmt, out: &mut HashSet<String>) {
    match stmt {
        Stmt::Let { name, value, .. }
        | Stmt::Assign { name, value, .. }
        | Stmt::Create { name, value, .. } => {
            out.insert(name.clone());
            collect_expr(value, out);
        }
        Stmt::ChainCreate { target, value, .. } => {
            collect_expr(target, out);
            collect_expr(value, out);
        }
        Stmt::Expr(e) | Stmt::Return(Some(e)) => collect_expr(e, out),
        Stmt::Return(None) => {}
    }
}

fn collect_body(body: &Body, out: &mut HashSet<String>) {
    match body {
        Body::Expr(e) => collect_expr(e, out),
        Body::Block(stmts) => collect_stmts(stmts, out),
    }
}

fn collect_expr(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Ident(n) => {
            out.insert(n.clone());
        }
        Expr::Unary { operand, .. } => collect_expr(operand, out),
        Expr::Binary { left, right, .. } => {
            collect_expr(left, out);
            collect_expr(right, out);
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            collect_expr(test, out);
            collect_expr(consequent, out);
            collect_expr(alternate, out);
        }
        Expr::Call { callee, args } => {
            collect_expr(callee, out);
            for a in args {
                collect_expr(a, out);
            }
        }
        Expr::Member { object, .. } => collect_expr(object, out),
        Expr::Index { object, index } => {
            collect_expr(object, out);
            collect_expr(index, out);
        }
        Expr::Array(items) => {
            for i in items {
                collect_expr(i, out);
            }
        }
        Expr::Arrow(func) => {
            for p in &func.params {
                out.extend(p.names().into_iter().map(str::to_owned));
            }
            collect_body(&func.body, out);
        }
        Expr::Flatten(site) => {
            out.insert(site.target.clone());
        }
        Expr::Context(ctx) => {
            if let Some(deps) = &ctx.deps {
                out.extend(deps.iter().cloned());
            }
            collect_body(&ctx.body, out);
        }
        Expr::Observe(obs) => {
            if let Some(deps) = &obs.deps {
                out.extend(deps.iter().cloned());
            }
            collect_stmts(&obs.body, out);
            if let Some(catch) = &obs.catch {
                if let Some(p) = &catch.param {
                    out.insert(p.clone());
                }
                collect_stmts(&catch.body, out);
            }
            if let Some(finally) = &obs.finally {
                collect_stmts(finally, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoweringConfig;
    use crate::parser::read_source;

    #[test]
    fn fresh_names_avoid_program_identifiers() {
        let program = read_source(
            "let $a = 1; let out = @ => @a + $a_1;",
            "n.obs",
            &LoweringConfig::default(),
        )
        .unwrap();
        let mut names = NameGen::for_program(&program);
        assert_eq!(names.fresh("$a"), "$a_2");
        assert_eq!(names.fresh("$b"), "$b");
        assert_eq!(names.fresh("$b"), "$b_1");
    }
}
