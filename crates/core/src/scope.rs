//! Explicit scope chain threaded through the lowering driver and the
//! resolver. No pass keeps a global symbol table; each receives the chain
//! it needs as a parameter.

use crate::ast::{ContextId, Stmt};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Module,
    /// Boundary of one observable context; declares nothing itself.
    Context(ContextId),
    Block,
    Function,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub names: BTreeSet<String>,
}

/// Where an outer dependency's binding lives, as seen from the context
/// that flattens it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum BindingSite {
    /// Top-level declaration of the program
    Module,
    /// Block or function binding; `context` is the nearest context
    /// enclosing that binding, if any
    Local { context: Option<ContextId> },
    /// Not declared anywhere visible (host global)
    Free,
}

#[derive(Debug, Clone, Default)]
pub struct ScopeChain {
    frames: Vec<Frame>,
}

impl ScopeChain {
    pub fn new() -> Self {
        ScopeChain::default()
    }

    /// Chain holding a single module frame.
    pub fn module(names: BTreeSet<String>) -> Self {
        let mut chain = ScopeChain::new();
        chain.push(FrameKind::Module, names);
        chain
    }

    pub fn push(&mut self, kind: FrameKind, names: BTreeSet<String>) {
        self.frames.push(Frame { kind, names });
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Index of the innermost frame declaring `name`.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.frames.iter().rposition(|f| f.names.contains(name))
    }

    /// Nearest context frame at or below `index`.
    fn context_around(&self, index: usize) -> Option<ContextId> {
        self.frames[..=index].iter().rev().find_map(|f| match f.kind {
            FrameKind::Context(id) => Some(id),
            _ => None,
        })
    }

    pub fn binding_site(&self, name: &str) -> BindingSite {
        match self.lookup(name) {
            None => BindingSite::Free,
            Some(idx) if self.frames[idx].kind == FrameKind::Module => BindingSite::Module,
            Some(idx) => BindingSite::Local {
                context: self.context_around(idx),
            },
        }
    }
}

/// Names a block declares, hoisted to the top of the block.
pub fn block_declarations(stmts: &[Stmt]) -> BTreeSet<String> {
    stmts
        .iter()
        .filter_map(|s| match s {
            Stmt::Let { name, .. } | Stmt::Create { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

/// The bindings of one context: everything declared inside its boundary
/// (block, function and catch frames pushed while walking its body) plus
/// its explicit dependency list. Lookups never look past the boundary
/// into `outer` for legality; `outer` only classifies legal targets.
#[derive(Debug)]
pub struct ScopeBinding<'a> {
    pub context: ContextId,
    outer: &'a ScopeChain,
    inner: ScopeChain,
    explicit: Option<&'a [String]>,
}

impl<'a> ScopeBinding<'a> {
    pub fn new(context: ContextId, outer: &'a ScopeChain, explicit: Option<&'a [String]>) -> Self {
        let mut inner = ScopeChain::new();
        inner.push(FrameKind::Context(context), BTreeSet::new());
        ScopeBinding {
            context,
            outer,
            inner,
            explicit,
        }
    }

    pub fn push(&mut self, kind: FrameKind, names: BTreeSet<String>) {
        self.inner.push(kind, names);
    }

    pub fn pop(&mut self) {
        self.inner.pop();
    }

    /// Declared inside this context's boundary.
    pub fn is_local(&self, name: &str) -> bool {
        self.inner.lookup(name).is_some()
    }

    /// Flattening `name` is allowed by the explicit list (if any).
    pub fn permits(&self, name: &str) -> bool {
        self.explicit
            .map_or(true, |list| list.iter().any(|n| n == name))
    }

    pub fn explicit(&self) -> Option<&'a [String]> {
        self.explicit
    }

    pub fn outer_site(&self, name: &str) -> BindingSite {
        self.outer.binding_site(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(ns: &[&str]) -> BTreeSet<String> {
        ns.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn binding_sites_classify_module_local_and_free() {
        let mut chain = ScopeChain::module(names(&["a"]));
        chain.push(FrameKind::Context(ContextId(7)), BTreeSet::new());
        chain.push(FrameKind::Block, names(&["s"]));
        assert_eq!(chain.binding_site("a"), BindingSite::Module);
        assert_eq!(
            chain.binding_site("s"),
            BindingSite::Local {
                context: Some(ContextId(7))
            }
        );
        assert_eq!(chain.binding_site("zzz"), BindingSite::Free);
    }

    #[test]
    fn inner_shadowing_wins() {
        let mut chain = ScopeChain::module(names(&["x"]));
        chain.push(FrameKind::Function, names(&["x"]));
        assert_eq!(chain.lookup("x"), Some(1));
        assert_eq!(chain.binding_site("x"), BindingSite::Local { context: None });
    }

    #[test]
    fn scope_binding_stops_at_context_boundary() {
        let outer = ScopeChain::module(names(&["a"]));
        let explicit = vec!["a".to_owned()];
        let mut binding = ScopeBinding::new(ContextId(1), &outer, Some(&explicit));
        binding.push(FrameKind::Block, names(&["x"]));
        assert!(binding.is_local("x"));
        assert!(!binding.is_local("a"));
        assert!(binding.permits("a"));
        assert!(!binding.permits("x"));
        binding.pop();
        assert!(!binding.is_local("x"));
    }
}
