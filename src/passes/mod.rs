//! Deterministic, dependency-ordered execution of semantic passes (spec §4.1, C4).

pub mod consistency;
pub mod exhaustiveness;
pub mod purity;
pub mod resolver;

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};

use crate::ast::Domain;
use crate::diagnostics::{Diagnostic, Severity};
use crate::error::VerifierError;
use crate::symbols::SymbolTable;

pub type PassId = &'static str;

/// Outputs passes leave behind for later passes to read (spec §4.1: "a mutable slot for
/// pass outputs keyed by pass id"). Keyed by `PassId`, values are pass-defined.
#[derive(Default)]
pub struct PassOutputs(BTreeMap<PassId, Box<dyn Any + Send + Sync>>);

impl PassOutputs {
    pub fn insert<T: Any + Send + Sync>(&mut self, id: PassId, value: T) {
        self.0.insert(id, Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, id: PassId) -> Option<&T> {
        self.0.get(id).and_then(|b| b.downcast_ref::<T>())
    }

    pub fn contains(&self, id: PassId) -> bool {
        self.0.contains_key(id)
    }
}

/// Shared analysis context handed to every pass's `run`. The AST is immutable; passes
/// may only add to `symbols`'s shadow state via `outputs`, never mutate the tree
/// itself (spec §4.1).
pub struct PassContext<'a> {
    pub ast: &'a Domain,
    pub file: &'a str,
    pub symbols: &'a SymbolTable,
    pub outputs: &'a mut PassOutputs,
}

impl<'a> PassContext<'a> {
    pub fn pass_ran(&self, id: PassId) -> bool {
        self.outputs.contains(id)
    }
}

/// A named, dependency-ordered unit of semantic analysis (spec §4.1).
pub trait Pass: Send + Sync {
    fn id(&self) -> PassId;
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn dependencies(&self) -> &[PassId] {
        &[]
    }
    fn priority(&self) -> i32 {
        0
    }
    fn enabled_by_default(&self) -> bool {
        true
    }
    fn run(&self, ctx: &mut PassContext) -> Vec<Diagnostic>;
}

/// Deterministically orders and runs a set of registered passes.
pub struct PassRunner {
    passes: Vec<Box<dyn Pass>>,
    fail_fast: bool,
}

impl Default for PassRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PassRunner {
    pub fn new() -> Self {
        PassRunner {
            passes: vec![],
            fail_fast: false,
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn register(&mut self, pass: Box<dyn Pass>) -> &mut Self {
        self.passes.push(pass);
        self
    }

    /// The crate's default pass set, in the order spec §2's data-flow row lists them:
    /// C5 (resolver) -> C6 (purity) -> C7 (exhaustiveness) -> C8 (consistency).
    pub fn with_default_passes() -> Self {
        let mut runner = PassRunner::new();
        runner
            .register(Box::new(resolver::SymbolResolverPass))
            .register(Box::new(purity::PurityScopePass))
            .register(Box::new(exhaustiveness::ExhaustivenessPass))
            .register(Box::new(consistency::ConsistencyUnusedPass));
        runner
    }

    /// Topologically sorts the registered passes (ties broken by priority, then id
    /// lexicographically, for determinism) and runs each over `ast`. A pass that
    /// panics is caught and converted to an `I0001` diagnostic; the remaining passes
    /// still run unless `fail_fast` was set.
    pub fn run(&self, ast: &Domain, file: &str) -> Result<Vec<Diagnostic>, VerifierError> {
        let order = self.topological_order()?;
        let symbols = SymbolTable::build(ast);
        let mut outputs = PassOutputs::default();
        let mut diagnostics = vec![];

        for idx in order {
            let pass = &self.passes[idx];
            if !pass.enabled_by_default() {
                continue;
            }
            let mut ctx = PassContext {
                ast,
                file,
                symbols: &symbols,
                outputs: &mut outputs,
            };
            let id = pass.id();
            let span = tracing::info_span!("pass", id = %id);
            let _enter = span.enter();

            let result = panic::catch_unwind(AssertUnwindSafe(|| pass.run(&mut ctx)));
            match result {
                Ok(pass_diagnostics) => {
                    outputs.insert(id, ());
                    diagnostics.extend(pass_diagnostics);
                }
                Err(payload) => {
                    let message = panic_message(&payload);
                    tracing::warn!(pass = %id, error = %message, "pass panicked");
                    diagnostics.push(Diagnostic::new(
                        "I0001",
                        "internal",
                        Severity::Error,
                        format!("internal error in pass '{id}': {message}"),
                        &ast.span,
                    ));
                    if self.fail_fast {
                        break;
                    }
                }
            }
        }

        Ok(diagnostics)
    }

    fn topological_order(&self) -> Result<Vec<usize>, VerifierError> {
        let index_by_id: BTreeMap<PassId, usize> = self
            .passes
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id(), i))
            .collect();

        for pass in &self.passes {
            for dep in pass.dependencies() {
                if !index_by_id.contains_key(dep) {
                    return Err(VerifierError::UnknownPass(dep));
                }
            }
        }

        // Kahn's algorithm, breaking ties deterministically by (priority, id).
        let mut in_degree = vec![0usize; self.passes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![vec![]; self.passes.len()];
        for (i, pass) in self.passes.iter().enumerate() {
            for dep in pass.dependencies() {
                let dep_idx = index_by_id[dep];
                dependents[dep_idx].push(i);
                in_degree[i] += 1;
            }
        }

        let mut ready: BTreeSet<(i32, PassId, usize)> = BTreeSet::new();
        for (i, pass) in self.passes.iter().enumerate() {
            if in_degree[i] == 0 {
                ready.insert((pass.priority(), pass.id(), i));
            }
        }

        let mut order = vec![];
        while let Some(&(priority, id, idx)) = ready.iter().next() {
            ready.remove(&(priority, id, idx));
            order.push(idx);
            for &dependent in &dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    let p = &self.passes[dependent];
                    ready.insert((p.priority(), p.id(), dependent));
                }
            }
        }

        if order.len() != self.passes.len() {
            let remaining: Vec<PassId> = (0..self.passes.len())
                .filter(|i| !order.contains(i))
                .map(|i| self.passes[i].id())
                .collect();
            return Err(VerifierError::DependencyCycle { passes: remaining });
        }

        Ok(order)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    struct PassA;
    impl Pass for PassA {
        fn id(&self) -> PassId {
            "a"
        }
        fn name(&self) -> &str {
            "a"
        }
        fn description(&self) -> &str {
            "test pass a"
        }
        fn run(&self, _ctx: &mut PassContext) -> Vec<Diagnostic> {
            vec![]
        }
    }

    struct PassB;
    impl Pass for PassB {
        fn id(&self) -> PassId {
            "b"
        }
        fn name(&self) -> &str {
            "b"
        }
        fn description(&self) -> &str {
            "test pass b"
        }
        fn dependencies(&self) -> &[PassId] {
            &["a"]
        }
        fn run(&self, _ctx: &mut PassContext) -> Vec<Diagnostic> {
            vec![]
        }
    }

    struct PanicPass;
    impl Pass for PanicPass {
        fn id(&self) -> PassId {
            "panics"
        }
        fn name(&self) -> &str {
            "panics"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn run(&self, _ctx: &mut PassContext) -> Vec<Diagnostic> {
            panic!("boom");
        }
    }

    fn empty_domain() -> Domain {
        Domain {
            name: "Test".to_string(),
            version: "1.0.0".to_string(),
            imports: vec![],
            types: vec![],
            entities: vec![],
            behaviors: vec![],
            invariants: vec![],
            policies: vec![],
            views: vec![],
            scenarios: vec![],
            chaos: vec![],
            span: Span::test(1, 1),
        }
    }

    #[test]
    fn dependency_order_is_respected() {
        let mut runner = PassRunner::new();
        runner.register(Box::new(PassB)).register(Box::new(PassA));
        let order = runner.topological_order().unwrap();
        let ids: Vec<PassId> = order.iter().map(|&i| runner.passes[i].id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn cycle_is_reported() {
        struct Cyclic1;
        impl Pass for Cyclic1 {
            fn id(&self) -> PassId {
                "c1"
            }
            fn name(&self) -> &str {
                "c1"
            }
            fn description(&self) -> &str {
                "cyclic"
            }
            fn dependencies(&self) -> &[PassId] {
                &["c2"]
            }
            fn run(&self, _ctx: &mut PassContext) -> Vec<Diagnostic> {
                vec![]
            }
        }
        struct Cyclic2;
        impl Pass for Cyclic2 {
            fn id(&self) -> PassId {
                "c2"
            }
            fn name(&self) -> &str {
                "c2"
            }
            fn description(&self) -> &str {
                "cyclic"
            }
            fn dependencies(&self) -> &[PassId] {
                &["c1"]
            }
            fn run(&self, _ctx: &mut PassContext) -> Vec<Diagnostic> {
                vec![]
            }
        }
        let mut runner = PassRunner::new();
        runner.register(Box::new(Cyclic1)).register(Box::new(Cyclic2));
        assert!(matches!(
            runner.topological_order(),
            Err(VerifierError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn panicking_pass_becomes_internal_diagnostic_and_others_still_run() {
        let mut runner = PassRunner::new();
        runner.register(Box::new(PanicPass)).register(Box::new(PassA));
        let domain = empty_domain();
        let diagnostics = runner.run(&domain, "test.dsl").unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, "I0001");
    }
}
