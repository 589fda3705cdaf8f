//! Safe RAII wrapper around the [`super::ffi`] calls, and the single entry point
//! ([`run_query`]) the solver's worker thread uses to hand Z3 a whole SMT-LIB script
//! and read back a structured outcome.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};

use once_cell::sync::Lazy;
use regex::Regex;

use super::ffi::{self, ZContext, ZSolver, Z_L_FALSE, Z_L_TRUE};

/// Matches a standalone `(set-option :produce-unsat-cores ...)` directive so it can be
/// stripped before parsing — `Config::new` already requests cores unconditionally, and
/// Z3 rejects this option inside a solver's own script text.
static PRODUCE_UNSAT_CORES_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(set-option\s+:produce-unsat-cores\s+\w+\)").expect("static regex"));

struct Config(ffi::ZConfig);

impl Config {
    /// Unsat-core production has to be requested of the `Config`, before the context
    /// exists — `Z3_solver_from_string` rejects a `(set-option :produce-unsat-cores
    /// true)` inside the script itself with "option value cannot be modified after
    /// initialization", so every context is built with cores already turned on and
    /// [`run_query`] strips that line out of incoming scripts.
    fn new() -> Self {
        let cfg = unsafe { ffi::Z3_mk_config() };
        let id = CString::new("unsat_core").expect("static id has no NUL");
        let value = CString::new("true").expect("static value has no NUL");
        unsafe { ffi::Z3_set_param_value(cfg, id.as_ptr(), value.as_ptr()) };
        Config(cfg)
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        unsafe { ffi::Z3_del_config(self.0) }
    }
}

/// Z3's default error handler aborts the process. Every context installs this
/// no-op handler instead, so a bad script surfaces through `Z3_get_error_code`
/// like any other error rather than taking the test binary down with it.
extern "C" fn ignore_error(_ctx: ZContext, _err: c_int) {}

struct Context(ZContext);

impl Context {
    fn new(cfg: &Config) -> Self {
        let ctx = unsafe { ffi::Z3_mk_context_rc(cfg.0) };
        unsafe { ffi::Z3_set_error_handler(ctx, Some(ignore_error)) };
        Context(ctx)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe { ffi::Z3_del_context(self.0) }
    }
}

struct Solver<'a> {
    ctx: &'a Context,
    handle: ZSolver,
}

impl<'a> Solver<'a> {
    fn new(ctx: &'a Context) -> Self {
        let handle = unsafe { ffi::Z3_mk_solver(ctx.0) };
        unsafe { ffi::Z3_solver_inc_ref(ctx.0, handle) };
        Solver { ctx, handle }
    }
}

impl<'a> Drop for Solver<'a> {
    fn drop(&mut self) {
        unsafe { ffi::Z3_solver_dec_ref(self.ctx.0, self.handle) }
    }
}

unsafe fn c_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeStatus {
    Sat,
    Unsat,
    Unknown,
}

/// Everything [`run_query`] can hand back to the worker-thread caller; never an `Err` —
/// a malformed script or an internal Z3 error is reported as `error`, not panicked or
/// thrown (spec §7: "the safe solver never throws").
#[derive(Debug, Clone)]
pub struct NativeOutcome {
    pub status: NativeStatus,
    pub model: Option<String>,
    pub unsat_core_tags: Vec<String>,
    pub reason_unknown: Option<String>,
    pub error: Option<String>,
}

/// Runs one complete SMT-LIB 2 script (`declare-*`s, tagged `assert`s, and a trailing
/// `check-sat`) against a fresh context/solver pair, and tears both down before
/// returning. Blocking; the caller is expected to run this on a dedicated thread and
/// race it against a deadline (spec §4.7).
///
/// `unsat_core_tags` is populated on a best-effort basis: the tactic-backed default
/// solver doesn't reliably track `:named` assertions parsed from script text the way
/// `assert-and-track` does, so callers that need a guaranteed core fall back to
/// deletion-based minimization ([`super::diagnostics::analyze_unsat`]) rather than
/// trusting this field to be non-empty on every unsat result.
pub fn run_query(script: &str) -> NativeOutcome {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let solver = Solver::new(&ctx);

    let script = PRODUCE_UNSAT_CORES_OPTION.replace_all(script, "");
    let Ok(c_script) = CString::new(script.into_owned()) else {
        return NativeOutcome {
            status: NativeStatus::Unknown,
            model: None,
            unsat_core_tags: vec![],
            reason_unknown: None,
            error: Some("query contains an embedded NUL byte".to_string()),
        };
    };

    unsafe { ffi::Z3_solver_from_string(ctx.0, solver.handle, c_script.as_ptr()) };

    let err_code = unsafe { ffi::Z3_get_error_code(ctx.0) };
    if err_code != 0 {
        let msg = unsafe { c_str(ffi::Z3_get_error_msg(ctx.0, err_code)) };
        return NativeOutcome {
            status: NativeStatus::Unknown,
            model: None,
            unsat_core_tags: vec![],
            reason_unknown: None,
            error: Some(format!("failed to parse SMT-LIB script: {msg}")),
        };
    }

    let lbool = unsafe { ffi::Z3_solver_check(ctx.0, solver.handle) };

    if lbool == Z_L_TRUE {
        let model = unsafe { ffi::Z3_solver_get_model(ctx.0, solver.handle) };
        unsafe { ffi::Z3_model_inc_ref(ctx.0, model) };
        let text = unsafe { c_str(ffi::Z3_model_to_string(ctx.0, model)) };
        unsafe { ffi::Z3_model_dec_ref(ctx.0, model) };
        NativeOutcome {
            status: NativeStatus::Sat,
            model: Some(text),
            unsat_core_tags: vec![],
            reason_unknown: None,
            error: None,
        }
    } else if lbool == Z_L_FALSE {
        let core = unsafe { ffi::Z3_solver_get_unsat_core(ctx.0, solver.handle) };
        unsafe { ffi::Z3_ast_vector_inc_ref(ctx.0, core) };
        let size = unsafe { ffi::Z3_ast_vector_size(ctx.0, core) };
        let mut tags = Vec::with_capacity(size as usize);
        for i in 0..size {
            let ast = unsafe { ffi::Z3_ast_vector_get(ctx.0, core, i) };
            tags.push(unsafe { c_str(ffi::Z3_ast_to_string(ctx.0, ast)) });
        }
        unsafe { ffi::Z3_ast_vector_dec_ref(ctx.0, core) };
        NativeOutcome {
            status: NativeStatus::Unsat,
            model: None,
            unsat_core_tags: tags,
            reason_unknown: None,
            error: None,
        }
    } else {
        let reason = unsafe { c_str(ffi::Z3_solver_get_reason_unknown(ctx.0, solver.handle)) };
        NativeOutcome {
            status: NativeStatus::Unknown,
            model: None,
            unsat_core_tags: vec![],
            reason_unknown: Some(reason),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satisfiable_script_returns_model() {
        let outcome = run_query(
            "(declare-const x Int) (assert (> x 0)) (assert (< x 10)) (check-sat)",
        );
        assert_eq!(outcome.status, NativeStatus::Sat);
        assert!(outcome.model.is_some());
    }

    #[test]
    fn unsatisfiable_script_returns_unsat() {
        let outcome = run_query(
            "(set-option :produce-unsat-cores true) (declare-const x Int) \
             (assert (! (> x 100) :named bound_lower)) \
             (assert (! (< x 50) :named bound_upper)) (check-sat)",
        );
        assert_eq!(outcome.status, NativeStatus::Unsat);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn malformed_script_reports_error_not_panic() {
        let outcome = run_query("(declare-const x NotASort)");
        assert!(outcome.error.is_some());
    }
}
