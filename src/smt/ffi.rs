//! Minimal hand-written FFI surface onto the system `libz3` C API.
//!
//! The encoder (spec §4.6) emits SMT-LIB2 text, so the only native calls this crate
//! needs are: build a context/solver, hand it the SMT-LIB text, run `check-sat`, and
//! read back a model, an unsat core, or a "reason unknown" string. That's a handful of
//! functions, declared directly rather than pulled in through a full generated-bindings
//! crate.

use std::ffi::c_void;
use std::os::raw::{c_char, c_int, c_uint};

pub type ZConfig = *mut c_void;
pub type ZContext = *mut c_void;
pub type ZSolver = *mut c_void;
pub type ZModel = *mut c_void;
pub type ZAstVector = *mut c_void;
pub type ZAst = *mut c_void;

/// Mirrors `Z3_lbool`: -1 = unsat, 0 = unknown, 1 = sat.
pub const Z_L_FALSE: c_int = -1;
pub const Z_L_UNDEF: c_int = 0;
pub const Z_L_TRUE: c_int = 1;

#[link(name = "z3")]
extern "C" {
    pub fn Z3_mk_config() -> ZConfig;
    pub fn Z3_del_config(cfg: ZConfig);
    pub fn Z3_set_param_value(cfg: ZConfig, id: *const c_char, value: *const c_char);

    pub fn Z3_mk_context_rc(cfg: ZConfig) -> ZContext;
    pub fn Z3_del_context(ctx: ZContext);
    pub fn Z3_set_error_handler(ctx: ZContext, handler: Option<extern "C" fn(ZContext, c_int)>);
    pub fn Z3_get_error_code(ctx: ZContext) -> c_int;
    pub fn Z3_get_error_msg(ctx: ZContext, err: c_int) -> *const c_char;

    pub fn Z3_mk_solver(ctx: ZContext) -> ZSolver;
    pub fn Z3_solver_inc_ref(ctx: ZContext, solver: ZSolver);
    pub fn Z3_solver_dec_ref(ctx: ZContext, solver: ZSolver);
    pub fn Z3_solver_from_string(ctx: ZContext, solver: ZSolver, text: *const c_char);
    pub fn Z3_solver_check(ctx: ZContext, solver: ZSolver) -> c_int;
    pub fn Z3_solver_get_model(ctx: ZContext, solver: ZSolver) -> ZModel;
    pub fn Z3_solver_get_unsat_core(ctx: ZContext, solver: ZSolver) -> ZAstVector;
    pub fn Z3_solver_get_reason_unknown(ctx: ZContext, solver: ZSolver) -> *const c_char;
    pub fn Z3_solver_to_string(ctx: ZContext, solver: ZSolver) -> *const c_char;

    pub fn Z3_model_inc_ref(ctx: ZContext, model: ZModel);
    pub fn Z3_model_dec_ref(ctx: ZContext, model: ZModel);
    pub fn Z3_model_to_string(ctx: ZContext, model: ZModel) -> *const c_char;

    pub fn Z3_ast_vector_inc_ref(ctx: ZContext, vector: ZAstVector);
    pub fn Z3_ast_vector_dec_ref(ctx: ZContext, vector: ZAstVector);
    pub fn Z3_ast_vector_size(ctx: ZContext, vector: ZAstVector) -> c_uint;
    pub fn Z3_ast_vector_get(ctx: ZContext, vector: ZAstVector, idx: c_uint) -> ZAst;
    pub fn Z3_ast_to_string(ctx: ZContext, ast: ZAst) -> *const c_char;
}
