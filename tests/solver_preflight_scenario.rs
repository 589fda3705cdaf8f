//! A query that blows past a configured solver limit should never reach Z3 at all —
//! the pre-flight check rejects it immediately, well under a millisecond.

use std::time::Duration;

use domainspec_verify::config::SolverLimits;
use domainspec_verify::smt::solver::{CancellationToken, SafeSolver, SmtQuery};

#[test]
fn oversized_variable_count_is_rejected_before_dispatch() {
    let solver = SafeSolver::new(SolverLimits {
        max_variables: 100,
        ..SolverLimits::default()
    });
    let query = SmtQuery {
        script: "(check-sat)".to_string(),
        variable_count: 1000,
        assertion_count: 1,
        max_expr_depth: 1,
        node_count: 1,
    };

    let result = solver.check_sat(&query, Duration::from_secs(5), &CancellationToken::new());

    assert!(result.rejected);
    assert!(result
        .rejection_reason
        .expect("rejection reason")
        .contains("variables"));
    assert!(result.wall_time_ms < 5);
}
