//! Deterministic single-line rendering of AST nodes in surface syntax.
//!
//! Parentheses are inserted only where precedence requires them, so a
//! rendered tree reads back to the same tree.

use crate::ast::*;
use std::fmt;

/// Lowest: arrow functions, contexts and observation blocks.
const PREC_ARROW: u8 = 1;
const PREC_CONDITIONAL: u8 = 2;
const PREC_UNARY: u8 = 10;
const PREC_POSTFIX: u8 = 11;
const PREC_PRIMARY: u8 = 12;

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Arrow(_) | Expr::Context(_) | Expr::Observe(_) => PREC_ARROW,
        Expr::Conditional { .. } => PREC_CONDITIONAL,
        Expr::Binary { op, .. } => op.precedence(),
        Expr::Unary { .. } => PREC_UNARY,
        Expr::Call { .. } | Expr::Member { .. } | Expr::Index { .. } => PREC_POSTFIX,
        Expr::Literal(_) | Expr::Ident(_) | Expr::Array(_) | Expr::Flatten(_) => PREC_PRIMARY,
    }
}

/// Write `expr`, parenthesized when it binds looser than `min`.
fn write_at(f: &mut fmt::Formatter<'_>, expr: &Expr, min: u8) -> fmt::Result {
    if precedence(expr) < min {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_block(f: &mut fmt::Formatter<'_>, stmts: &[Stmt]) -> fmt::Result {
    if stmts.is_empty() {
        return f.write_str("{}");
    }
    f.write_str("{")?;
    for s in stmts {
        write!(f, " {}", s)?;
    }
    f.write_str(" }")
}

fn write_deps(f: &mut fmt::Formatter<'_>, deps: &Option<Vec<String>>) -> fmt::Result {
    if let Some(deps) = deps {
        f.write_str("(")?;
        write_list(f, deps)?;
        f.write_str(")")?;
    }
    Ok(())
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Float(s) => f.write_str(s),
            Literal::Str(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        other => write!(f, "{}", other)?,
                    }
                }
                f.write_str("\"")
            }
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Name(n) => f.write_str(n),
            Param::Tuple(ns) => {
                f.write_str("[")?;
                write_list(f, ns)?;
                f.write_str("]")
            }
        }
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Expr(e) => write!(f, "{}", e),
            Body::Block(stmts) => write_block(f, stmts),
        }
    }
}

impl fmt::Display for FlattenExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 1..self.depth {
            f.write_str("@")?;
        }
        f.write_str(if self.nullish { "@?" } else { "@" })?;
        f.write_str(&self.target)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(l) => write!(f, "{}", l),
            Expr::Ident(n) => f.write_str(n),
            Expr::Unary { op, operand } => {
                f.write_str(op.symbol())?;
                write_at(f, operand, PREC_UNARY)
            }
            Expr::Binary { op, left, right } => {
                let p = op.precedence();
                write_at(f, left, p)?;
                write!(f, " {} ", op.symbol())?;
                write_at(f, right, p + 1)
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                write_at(f, test, PREC_CONDITIONAL + 1)?;
                f.write_str(" ? ")?;
                write_at(f, consequent, PREC_CONDITIONAL)?;
                f.write_str(" : ")?;
                write_at(f, alternate, PREC_CONDITIONAL)
            }
            Expr::Call { callee, args } => {
                write_at(f, callee, PREC_POSTFIX)?;
                f.write_str("(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Member { object, property } => {
                write_at(f, object, PREC_POSTFIX)?;
                write!(f, ".{}", property)
            }
            Expr::Index { object, index } => {
                write_at(f, object, PREC_POSTFIX)?;
                write!(f, "[{}]", index)
            }
            Expr::Array(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::Arrow(func) => {
                f.write_str("(")?;
                write_list(f, &func.params)?;
                write!(f, ") => {}", func.body)
            }
            Expr::Flatten(site) => write!(f, "{}", site),
            Expr::Context(ctx) => {
                f.write_str("@")?;
                write_deps(f, &ctx.deps)?;
                write!(f, " => {}", ctx.body)
            }
            Expr::Observe(obs) => {
                f.write_str("observe")?;
                write_deps(f, &obs.deps)?;
                f.write_str(" ")?;
                write_block(f, &obs.body)?;
                if let Some(catch) = &obs.catch {
                    f.write_str(" catch ")?;
                    if let Some(param) = &catch.param {
                        write!(f, "({}) ", param)?;
                    }
                    write_block(f, &catch.body)?;
                }
                if let Some(finally) = &obs.finally {
                    f.write_str(" finally ")?;
                    write_block(f, finally)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Let { name, value, .. } => write!(f, "let {} = {};", name, value),
            Stmt::Assign { name, value, .. } => write!(f, "{} = {};", name, value),
            Stmt::Create { name, value, .. } => write!(f, "let @{} = {};", name, value),
            Stmt::ChainCreate {
                markers,
                target,
                value,
                ..
            } => {
                f.write_str("let ")?;
                for _ in 0..*markers {
                    f.write_str("@")?;
                }
                write!(f, "{} = {};", target, value)
            }
            Stmt::Expr(e) => write!(f, "{};", e),
            Stmt::Return(Some(e)) => write!(f, "return {};", e),
            Stmt::Return(None) => f.write_str("return;"),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.body.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", s)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::LoweringConfig;
    use crate::parser::read_source;

    fn roundtrip(src: &str) -> String {
        read_source(src, "r.obs", &LoweringConfig::default())
            .unwrap()
            .to_string()
    }

    #[test]
    fn keeps_required_parentheses_only() {
        assert_eq!(roundtrip("let x = (a + b) * (c - d);"), "let x = (a + b) * (c - d);");
        assert_eq!(roundtrip("let x = a - (b - c);"), "let x = a - (b - c);");
        assert_eq!(roundtrip("let x = ((a * b)) + c;"), "let x = a * b + c;");
    }

    #[test]
    fn renders_context_nodes() {
        assert_eq!(roundtrip("let o = @(a) => @@?a ?? b;"), "let o = @(a) => @@?a ?? b;");
        assert_eq!(
            roundtrip("observe { f(@a) } catch (e) { g(e) } finally { h() }"),
            "observe { f(@a); } catch (e) { g(e); } finally { h(); };"
        );
    }

    #[test]
    fn renders_member_of_arrow_with_parentheses() {
        assert_eq!(
            roundtrip("let y = ((x) => x).name;"),
            "let y = ((x) => x).name;"
        );
    }

    #[test]
    fn escapes_strings() {
        assert_eq!(roundtrip(r#"let s = "a\"b\n";"#), r#"let s = "a\"b\n";"#);
    }
}
