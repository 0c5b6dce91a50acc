#![allow(clippy::result_large_err)]
//! obsctx-core: resolution and lowering of observable contexts.
//!
//! Rewrites flatten markers (`@x`, `@@x`, `@?x`) inside observable
//! contexts into `combine(...).transform(...)` pipelines, and observation
//! blocks into `combine(...).subscribe(...)` calls.
//!
//! # Passes
//!
//! 0. reader ([`parser`]) -- surface text to AST
//! 1. [`pass1_desugar`] -- creation and chain-creation shorthand
//! 2. [`pass2_scan`] -- context ids, innermost-first order, stray markers
//! 3. [`pass3_resolve`] -- scoping checks and dependency tables
//! 4. [`pass4_lower`] -- pipeline construction and in-place rewrite
//! 5. [`pass5_report`] -- JSON lowering report
//!
//! # Public API
//!
//! - [`lower_source()`], [`lower_file()`], [`lower_program()`] -- fail-fast pipeline
//! - [`lower_program_recovering()`], [`lower_source_recovering()`] -- per-declaration recovery
//! - [`LowerError`] / [`ErrorKind`] -- located static diagnostics
//! - [`LoweringConfig`] -- guards, error cap and runtime operator names

pub mod ast;
pub mod config;
pub mod error;
pub mod lexer;
pub mod lower;
pub mod names;
pub mod parser;
pub mod pass1_desugar;
pub mod pass2_scan;
pub mod pass3_resolve;
pub mod pass4_lower;
pub mod pass5_report;
pub mod render;
pub mod scope;

// ── Convenience re-exports: key types ────────────────────────────────

pub use ast::{
    Body, ContextExpr, ContextId, Expr, FlattenExpr, ObserveExpr, Param, Program, Provenance, Stmt,
};
pub use config::{ConfigError, LoweringConfig, OperatorNames};
pub use error::{ErrorKind, LowerError};
pub use lower::Lowered;
pub use pass2_scan::{ContextKind, ContextRecord, ScanResult};
pub use pass3_resolve::{Dependency, DependencyKey, DependencyTable};
pub use pass4_lower::LoweredContext;
pub use scope::{BindingSite, ScopeChain};

// ── Convenience re-exports: pipeline entry points ────────────────────

pub use lower::{lower_file, lower_program, lower_program_recovering, lower_source, lower_source_recovering};
pub use parser::read_source;
pub use pass1_desugar::desugar_declaration;
pub use pass2_scan::scan_declaration;
pub use pass3_resolve::{check_unresolved, resolve_context, resolve_observation};
pub use pass4_lower::{chain_adapt, lower_context, lower_declaration, lower_observation};
pub use pass5_report::serialize_report;
