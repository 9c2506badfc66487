//! The expression-program seam: jq programs compiled once, evaluated as
//! lazy streams of values-or-errors.
//!
//! Errors raised inside a program are *values* in its output stream, never
//! host errors. Filter and lambda call sites consume only the first yielded
//! item; the monitor site drains the stream.

pub mod loader;
pub mod program;
pub mod regex_cache;

mod natives;

pub use loader::{load_program, LoadError};
pub use natives::regex_cache;
pub use program::{Output, Program, ProgramError, ProgramKind};
pub use regex_cache::{RegexCache, RegexCompile};
