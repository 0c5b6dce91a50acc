//! Lowering pipeline: surface source -> program with every observable
//! context rewritten into a reactive pipeline expression.
//!
//! This is a thin orchestrator over the pass modules. Each top-level
//! declaration is desugared, scanned, resolved and lowered on its own;
//! an error aborts only the declaration it was found in.

use crate::ast::{Program, Stmt};
use crate::config::LoweringConfig;
use crate::error::LowerError;
use crate::lexer;
use crate::names::NameGen;
use crate::parser;
use crate::pass1_desugar::desugar_declaration;
use crate::pass2_scan::scan_declaration;
use crate::pass3_resolve::check_unresolved;
use crate::pass4_lower::{lower_declaration, LoweredContext};
use crate::scope::{block_declarations, ScopeChain};
use std::path::Path;
use tracing::debug;

/// A lowered program and the contexts that were rewritten in it,
/// innermost first within each declaration.
#[derive(Debug, Clone)]
pub struct Lowered {
    pub program: Program,
    pub contexts: Vec<LoweredContext>,
}

/// Read and lower a source string; stops at the first error.
pub fn lower_source(src: &str, filename: &str, config: &LoweringConfig) -> Result<Lowered, LowerError> {
    let program = parser::read_source(src, filename, config)?;
    lower_program(program, config)
}

/// Read and lower a file; stops at the first error.
pub fn lower_file(path: &Path, config: &LoweringConfig) -> Result<Lowered, LowerError> {
    let filename = path.display().to_string();
    let src = std::fs::read_to_string(path)
        .map_err(|e| LowerError::io(&filename, format!("cannot read {}: {}", filename, e)))?;
    lower_source(&src, &filename, config)
}

/// Lower a parsed program, returning the first error encountered.
pub fn lower_program(program: Program, config: &LoweringConfig) -> Result<Lowered, LowerError> {
    let (lowered, mut errors) = run(program, config, true);
    if errors.is_empty() {
        Ok(lowered)
    } else {
        Err(errors.swap_remove(0))
    }
}

/// Lower a parsed program in recovering mode: declarations that fail are
/// left out of the output, the rest are lowered. At most
/// `config.max_errors` errors are collected.
pub fn lower_program_recovering(program: Program, config: &LoweringConfig) -> (Lowered, Vec<LowerError>) {
    run(program, config, false)
}

/// Read and lower a source string in recovering mode. Parse errors and
/// lowering errors are reported together, parse errors first.
pub fn lower_source_recovering(
    src: &str,
    filename: &str,
    config: &LoweringConfig,
) -> (Lowered, Vec<LowerError>) {
    let tokens = match lexer::lex(src, filename) {
        Ok(t) => t,
        Err(e) => {
            let empty = Lowered {
                program: Program {
                    file: filename.to_owned(),
                    body: Vec::new(),
                },
                contexts: Vec::new(),
            };
            return (empty, vec![e]);
        }
    };
    let (program, mut errors) = parser::parse_recovering(&tokens, filename, config);
    let (lowered, lower_errors) = run(program, config, false);
    errors.extend(lower_errors);
    errors.truncate(config.max_errors.max(1));
    (lowered, errors)
}

fn run(program: Program, config: &LoweringConfig, fail_fast: bool) -> (Lowered, Vec<LowerError>) {
    let mut names = NameGen::for_program(&program);
    let Program { file, body } = program;
    let max_errors = config.max_errors.max(1);
    let mut errors = Vec::new();

    // Pass 1: shorthand desugaring
    let mut groups: Vec<Vec<Stmt>> = Vec::with_capacity(body.len());
    for stmt in body {
        match desugar_declaration(stmt, &mut names, config) {
            Ok(group) => groups.push(group),
            Err(e) => {
                errors.push(e);
                if fail_fast || errors.len() >= max_errors {
                    return (empty(file), errors);
                }
            }
        }
    }

    let module = ScopeChain::module(groups.iter().flat_map(|g| block_declarations(g)).collect());

    // Passes 2-4, one declaration at a time
    let mut next_id = 0u32;
    let mut out = Vec::new();
    let mut contexts = Vec::new();
    for mut group in groups {
        match lower_group(&mut group, &module, &mut next_id, &mut names, config) {
            Ok(lowered) => {
                out.extend(group);
                contexts.extend(lowered);
            }
            Err(e) => {
                errors.push(e);
                if fail_fast || errors.len() >= max_errors {
                    break;
                }
            }
        }
    }
    debug!(file = %file, contexts = contexts.len(), errors = errors.len(), "lowered program");

    let lowered = Lowered {
        program: Program { file, body: out },
        contexts,
    };
    (lowered, errors)
}

fn empty(file: String) -> Lowered {
    Lowered {
        program: Program { file, body: Vec::new() },
        contexts: Vec::new(),
    }
}

fn lower_group(
    group: &mut [Stmt],
    module: &ScopeChain,
    next_id: &mut u32,
    names: &mut NameGen,
    config: &LoweringConfig,
) -> Result<Vec<LoweredContext>, LowerError> {
    // Pass 2: context scanning
    let scan = scan_declaration(group, next_id, config)?;
    // Pass 3 (unresolved sites) and passes 3-4 per context
    check_unresolved(&scan)?;
    lower_declaration(group, &scan, module, names, config)
}
