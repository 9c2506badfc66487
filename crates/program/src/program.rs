//! Compiled jq programs.
//!
//! A [`Program`] is validated once at construction and evaluated many times
//! from many worker threads. The jaq interpreter's compiled form is not
//! thread-safe, so each thread keeps its own compiled copy in a
//! thread-local cache keyed by program id; the deterministic compile was
//! already proven good at construction time.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use jaq_interpret::{Ctx, FilterT, ParseCtx, RcIter, Val};
use serde_json::Value;
use thiserror::Error;

use crate::natives;

// ── Helper definitions ───────────────────────────────────────────────

const REGEX_DEFS: &str = r#"
def test_cached($re): [., $re] | _regex_test;
def capture_cached($re): [., $re] | _regex_capture;
"#;

const GROUP_FILTER_DEFS: &str = r#"
def filter_error($tag): error("filter_error: not relevant msg for group: \($tag)");
"#;

const NAMESPACE_FILTER_DEFS: &str = r#"
def filter_error($tag): error("filter_error: not relevant msg for namespace: \($tag)");
def log($namespace; $id; $time; $metric): {namespace: $namespace, id: $id, time: $time, metric: $metric};
"#;

// ── Program kinds ────────────────────────────────────────────────────

/// Where a program sits in the pipeline; selects its helper definitions
/// and bound variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    /// Message → group name (or `filter_error`).
    GroupFilter,
    /// Message → metric record (or `filter_error`).
    NamespaceFilter,
    /// `($state, $metric)` → new state.
    Lambda,
    /// Namespace snapshot → emissions.
    Monitor,
}

impl ProgramKind {
    fn extra_defs(self) -> Option<&'static str> {
        match self {
            ProgramKind::GroupFilter => Some(GROUP_FILTER_DEFS),
            ProgramKind::NamespaceFilter => Some(NAMESPACE_FILTER_DEFS),
            ProgramKind::Lambda | ProgramKind::Monitor => None,
        }
    }

    fn vars(self) -> Vec<String> {
        match self {
            ProgramKind::Lambda => vec!["state".to_string(), "metric".to_string()],
            _ => Vec::new(),
        }
    }
}

// ── Outputs ──────────────────────────────────────────────────────────

/// One item of a program's output stream. Program-level errors travel as
/// values here; the call site decides whether they mean "skip" (filters),
/// "keep old state" (lambdas), or "log" (monitors).
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Value(Value),
    Error(String),
}

impl Output {
    pub fn is_error(&self) -> bool {
        matches!(self, Output::Error(_))
    }
}

impl From<Result<Val, jaq_interpret::Error>> for Output {
    fn from(item: Result<Val, jaq_interpret::Error>) -> Self {
        match item {
            Ok(v) => Output::Value(Value::from(v)),
            Err(e) => Output::Error(e.to_string()),
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ProgramError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("compile error: {0} undefined or misused name(s)")]
    Compile(usize),
}

// ── Program ──────────────────────────────────────────────────────────

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static COMPILED: RefCell<HashMap<u64, Rc<jaq_interpret::Filter>>> =
        RefCell::new(HashMap::new());
}

/// A compiled jq program.
pub struct Program {
    id: u64,
    kind: ProgramKind,
    source: String,
}

impl Program {
    /// Parse and compile `source`, with the helper definitions and bound
    /// variables implied by `kind`.
    pub fn compile(source: &str, kind: ProgramKind) -> Result<Self, ProgramError> {
        let program = Self {
            id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            source: source.to_string(),
        };
        // Validate (and warm this thread's cache) up front.
        program.with_filter(|_| ())?;
        Ok(program)
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    /// Run the program and consume only the first yielded item.
    ///
    /// `vars` must match the bound variables of the program's kind (the
    /// lambda's `$state, $metric`, in that order; empty otherwise).
    pub fn first(&self, input: Value, vars: Vec<Value>) -> Option<Output> {
        let run = self.with_filter(|filter| {
            let inputs = RcIter::new(core::iter::empty());
            let vars: Vec<Val> = vars.into_iter().map(Val::from).collect();
            filter
                .run((Ctx::new(vars, &inputs), Val::from(input)))
                .next()
                .map(Output::from)
        });
        match run {
            Ok(out) => out,
            Err(e) => Some(Output::Error(e.to_string())),
        }
    }

    /// Run the program and drain every yielded item.
    pub fn collect(&self, input: Value, vars: Vec<Value>) -> Vec<Output> {
        let run = self.with_filter(|filter| {
            let inputs = RcIter::new(core::iter::empty());
            let vars: Vec<Val> = vars.into_iter().map(Val::from).collect();
            filter
                .run((Ctx::new(vars, &inputs), Val::from(input)))
                .map(Output::from)
                .collect()
        });
        match run {
            Ok(outs) => outs,
            Err(e) => vec![Output::Error(e.to_string())],
        }
    }

    fn with_filter<T>(
        &self,
        f: impl FnOnce(&jaq_interpret::Filter) -> T,
    ) -> Result<T, ProgramError> {
        let filter = COMPILED.with(|cell| {
            if let Some(filter) = cell.borrow().get(&self.id) {
                return Ok(filter.clone());
            }
            let filter = Rc::new(compile_filter(&self.source, self.kind)?);
            cell.borrow_mut().insert(self.id, filter.clone());
            Ok(filter)
        })?;
        Ok(f(&filter))
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

fn compile_filter(
    source: &str,
    kind: ProgramKind,
) -> Result<jaq_interpret::Filter, ProgramError> {
    let mut ctx = ParseCtx::new(kind.vars());
    ctx.insert_natives(jaq_core::core());
    ctx.insert_natives(natives::natives());
    ctx.insert_defs(jaq_std::std());
    insert_defs_src(&mut ctx, REGEX_DEFS)?;
    if let Some(extra) = kind.extra_defs() {
        insert_defs_src(&mut ctx, extra)?;
    }

    let (main, errs) = jaq_parse::parse(source, jaq_parse::main());
    if !errs.is_empty() {
        return Err(ProgramError::Parse(format!("{errs:?}")));
    }
    let main = main.ok_or_else(|| ProgramError::Parse("empty program".to_string()))?;

    let filter = ctx.compile(main);
    if !ctx.errs.is_empty() {
        return Err(ProgramError::Compile(ctx.errs.len()));
    }
    Ok(filter)
}

fn insert_defs_src(ctx: &mut ParseCtx, src: &str) -> Result<(), ProgramError> {
    let (defs, errs) = jaq_parse::parse(src, jaq_parse::defs());
    if !errs.is_empty() {
        return Err(ProgramError::Parse(format!("{errs:?}")));
    }
    let defs = defs.ok_or_else(|| ProgramError::Parse("empty definitions".to_string()))?;
    ctx.insert_defs(defs);
    Ok(())
}
