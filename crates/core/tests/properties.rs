//! Property-based tests for the lowering.
//!
//! Invariants that hold for every generated context:
//! - one slot per distinct (ident, depth, nullish) key, in first-seen order
//! - no flatten marker survives lowering
//! - lowering already-lowered output is the identity
//! - a k-marker chain creation adds k - 1 switch adapters
//! - putting each slot's marker back into the transform body restores
//!   the context body

use obsctx_core::{
    chain_adapt, lower_source, read_source, Body, DependencyTable, Expr, FlattenExpr, LoweringConfig,
    OperatorNames, Param, Provenance, Stmt,
};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Site {
    ident: &'static str,
    depth: u32,
    nullish: bool,
}

impl Site {
    fn render(&self) -> String {
        let mut s = "@".repeat(self.depth as usize - 1);
        s.push_str(if self.nullish { "@?" } else { "@" });
        s.push_str(self.ident);
        s
    }

    fn key(&self) -> (&'static str, u32, bool) {
        (self.ident, self.depth, self.nullish)
    }
}

fn site() -> impl Strategy<Value = Site> {
    (prop::sample::select(vec!["a", "b", "c"]), 1u32..=3, any::<bool>()).prop_map(
        |(ident, depth, nullish)| Site {
            ident,
            depth,
            nullish,
        },
    )
}

fn context_source(sites: &[Site]) -> String {
    let items: Vec<String> = sites.iter().map(Site::render).collect();
    format!("let o = @ => [{}];", items.join(", "))
}

fn first_seen_keys(sites: &[Site]) -> Vec<(&'static str, u32, bool)> {
    let mut keys = Vec::new();
    for s in sites {
        if !keys.contains(&s.key()) {
            keys.push(s.key());
        }
    }
    keys
}

/// A context body mixing operators, flatten sites and plain identifiers.
#[derive(Debug, Clone)]
enum Term {
    Site(Site),
    Plain(&'static str),
    Int(u8),
    Binary(&'static str, Box<Term>, Box<Term>),
}

impl Term {
    fn render(&self) -> String {
        match self {
            Term::Site(s) => s.render(),
            Term::Plain(name) => (*name).to_owned(),
            Term::Int(n) => n.to_string(),
            Term::Binary(op, l, r) => format!("({} {} {})", l.render(), op, r.render()),
        }
    }
}

fn term() -> impl Strategy<Value = Term> {
    let leaf = prop_oneof![
        site().prop_map(Term::Site),
        prop::sample::select(vec!["x", "y", "k"]).prop_map(Term::Plain),
        (0u8..10).prop_map(Term::Int),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        (
            prop::sample::select(vec!["+", "-", "*", "&&", "??", "<"]),
            inner.clone(),
            inner,
        )
            .prop_map(|(op, l, r)| Term::Binary(op, Box::new(l), Box::new(r)))
    })
}

fn let_value(stmt: &Stmt) -> &Expr {
    match stmt {
        Stmt::Let { value, .. } => value,
        other => panic!("expected let, got {:?}", other),
    }
}

/// Replace every slot name with the marker form of its dependency.
fn restore_markers(expr: &mut Expr, slots: &[String], table: &DependencyTable) {
    match expr {
        Expr::Ident(name) => {
            if let Some(i) = slots.iter().position(|s| s.as_str() == name.as_str()) {
                let key = &table.entries()[i].key;
                *expr = Expr::Flatten(FlattenExpr {
                    target: key.ident.clone(),
                    depth: key.depth,
                    nullish: key.nullish,
                    prov: Provenance::synthetic(),
                });
            }
        }
        Expr::Binary { left, right, .. } => {
            restore_markers(left, slots, table);
            restore_markers(right, slots, table);
        }
        Expr::Unary { operand, .. } => restore_markers(operand, slots, table),
        _ => {}
    }
}

proptest! {
    #[test]
    fn one_slot_per_distinct_key(sites in prop::collection::vec(site(), 1..8)) {
        let lowered = lower_source(&context_source(&sites), "p.obs", &LoweringConfig::default()).unwrap();
        prop_assert_eq!(lowered.contexts.len(), 1);
        let table = &lowered.contexts[0].dependencies;

        let keys: Vec<(String, u32, bool)> = table
            .entries()
            .iter()
            .map(|d| (d.key.ident.clone(), d.key.depth, d.key.nullish))
            .collect();
        let expected: Vec<(String, u32, bool)> = first_seen_keys(&sites)
            .into_iter()
            .map(|(i, d, n)| (i.to_owned(), d, n))
            .collect();
        prop_assert_eq!(keys, expected);

        let occurrences: usize = table.entries().iter().map(|d| d.occurrences).sum();
        prop_assert_eq!(occurrences, sites.len());
        for (i, d) in table.entries().iter().enumerate() {
            prop_assert_eq!(d.slot, i);
        }
    }

    #[test]
    fn lowering_removes_every_marker_and_is_idempotent(sites in prop::collection::vec(site(), 0..8)) {
        let config = LoweringConfig::default();
        let once = lower_source(&context_source(&sites), "p.obs", &config).unwrap();
        let text = once.program.to_string();
        prop_assert!(!text.contains('@'), "marker left in {}", text);

        let twice = lower_source(&text, "p.obs", &config).unwrap();
        prop_assert!(twice.contexts.is_empty());
        prop_assert_eq!(twice.program.to_string(), text.clone());

        // the rendered text reads back as the same tree
        let reread = read_source(&text, "p.obs", &config).unwrap();
        prop_assert_eq!(reread.to_string(), text);
    }

    #[test]
    fn adapter_encodes_depth_and_nullish(depth in 1u32..6, nullish in any::<bool>()) {
        let ops = OperatorNames::default();
        let text = chain_adapt("s", depth, nullish, &ops).to_string();
        prop_assert_eq!(text.matches(".flattenLatest()").count(), depth as usize - 1);
        prop_assert_eq!(text.ends_with(".defaultUntilFirst()"), nullish);
        prop_assert!(text.starts_with('s'));
    }

    #[test]
    fn chain_creation_adds_one_switch_per_extra_marker(markers in 1usize..6) {
        let src = format!("let {}v = @s;", "@".repeat(markers));
        let lowered = lower_source(&src, "p.obs", &LoweringConfig::default()).unwrap();
        prop_assert_eq!(lowered.program.body.len(), markers);
        prop_assert_eq!(lowered.contexts.len(), markers);

        let text = lowered.program.to_string();
        prop_assert_eq!(text.matches(".flattenLatest()").count(), markers - 1);
        let last = text.lines().last().unwrap_or_default();
        prop_assert!(last.starts_with("let v = "), "last binding was {}", last);
    }

    #[test]
    fn slots_substitute_back_to_the_original_body(body in term()) {
        let src = format!("let o = @ => {};", body.render());
        let config = LoweringConfig::default();

        let original = read_source(&src, "p.obs", &config).unwrap();
        let expected = match let_value(&original.body[0]) {
            Expr::Context(ctx) => match &ctx.body {
                Body::Expr(e) => e.to_string(),
                other => panic!("expected expression body, got {:?}", other),
            },
            other => panic!("expected context, got {:?}", other),
        };

        let lowered = lower_source(&src, "p.obs", &config).unwrap();
        prop_assert_eq!(lowered.contexts.len(), 1);
        let table = &lowered.contexts[0].dependencies;
        let func = match let_value(&lowered.program.body[0]) {
            Expr::Call { args, .. } => match args.first() {
                Some(Expr::Arrow(func)) => func.clone(),
                other => panic!("expected transform arrow, got {:?}", other),
            },
            other => panic!("expected transform call, got {:?}", other),
        };
        let slots = match func.params.as_slice() {
            [Param::Tuple(names)] => names.clone(),
            other => panic!("expected one tuple parameter, got {:?}", other),
        };
        prop_assert_eq!(slots.len(), table.len());

        let mut restored = match func.body {
            Body::Expr(e) => *e,
            other => panic!("expected expression body, got {:?}", other),
        };
        restore_markers(&mut restored, &slots, table);
        prop_assert_eq!(restored.to_string(), expected);
    }
}
