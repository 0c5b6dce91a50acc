//! obsctx-eval -- runs lowered programs against push streams.
//!
//! The evaluator consumes the output of `obsctx-core` (never raw
//! surface syntax), supplies the four stream primitives the lowering
//! targets, and lets the host drive sources through [`Subject`]s.
//!
//! Everything is single-threaded: values, streams and closures are
//! reference counted and may deliver events synchronously.

pub mod error;
pub mod interp;
pub mod operators;
pub mod stream;
pub mod value;

pub use error::EvalError;
pub use interp::{Closure, Env, Interpreter};
pub use stream::{Event, Observer, Stream, Subject, Subscription};
pub use value::Value;

use obsctx_core::LoweringConfig;
use tracing::debug;

/// Lower `src`, bind the host values, then run its top-level statements.
///
/// Returns the interpreter so the host can inspect globals and keep
/// driving its subjects afterwards.
pub fn run_source(
    src: &str,
    filename: &str,
    config: &LoweringConfig,
    bindings: Vec<(&str, Value)>,
) -> Result<Interpreter, EvalError> {
    let lowered = obsctx_core::lower_source(src, filename, config)?;
    debug!(file = filename, contexts = lowered.contexts.len(), "running lowered program");
    let interp = Interpreter::new(config.operators.clone());
    for (name, value) in bindings {
        interp.define(name, value);
    }
    interp.run(&lowered.program)?;
    Ok(interp)
}
