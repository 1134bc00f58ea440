//! Linear-sum assignment (Hungarian / Munkres).
//!
//! Shortest-augmenting-path formulation with row/column potentials, O(N³)
//! over a dense `DMatrix`. The cost builder marks forbidden pairs with a
//! large finite sentinel rather than infinity, so feasibility is checked on
//! the final matching: any selected sentinel entry means no permutation is
//! consistent with the element restrictions.

use crate::core::constants::COST_SENTINEL;
use crate::core::models::Permutation;
use crate::engine::error::EngineError;
use nalgebra::DMatrix;

/// Solves `min Σ C[i, π(i)]` and returns π as a [`Permutation`]: row `i` of
/// the reference is assigned target column `π(i)`.
pub fn solve(cost: &DMatrix<f64>) -> Result<Permutation, EngineError> {
    let n = cost.nrows();
    assert_eq!(n, cost.ncols(), "cost matrix must be square");
    if n == 0 {
        return Ok(Permutation::identity(0));
    }

    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; n + 1];
    // match_col[j] = row currently assigned to column j; n is the virtual
    // start column of each augmentation
    let mut match_col = vec![usize::MAX; n + 1];

    for i in 0..n {
        match_col[n] = i;
        let mut j_cur = n;
        let mut min_slack = vec![f64::INFINITY; n + 1];
        let mut prev_col = vec![n; n + 1];
        let mut visited = vec![false; n + 1];

        loop {
            visited[j_cur] = true;
            let row = match_col[j_cur];
            let mut delta = f64::INFINITY;
            let mut j_next = n;

            for j in 0..n {
                if visited[j] {
                    continue;
                }
                let reduced = cost[(row, j)] - u[row] - v[j];
                if reduced < min_slack[j] {
                    min_slack[j] = reduced;
                    prev_col[j] = j_cur;
                }
                if min_slack[j] < delta {
                    delta = min_slack[j];
                    j_next = j;
                }
            }

            if !delta.is_finite() {
                return Err(EngineError::AssignmentInfeasible { row: i });
            }

            for j in 0..=n {
                if visited[j] {
                    u[match_col[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_slack[j] -= delta;
                }
            }

            j_cur = j_next;
            if match_col[j_cur] == usize::MAX {
                break;
            }
        }

        // augment along the alternating path back to the virtual column
        loop {
            let j_prev = prev_col[j_cur];
            match_col[j_cur] = match_col[j_prev];
            j_cur = j_prev;
            if j_cur == n {
                break;
            }
        }
    }

    let mut assignment = vec![usize::MAX; n];
    for j in 0..n {
        let row = match_col[j];
        if row != usize::MAX {
            assignment[row] = j;
        }
    }

    for (row, &j) in assignment.iter().enumerate() {
        if j == usize::MAX || cost[(row, j)] >= COST_SENTINEL * 0.5 {
            return Err(EngineError::AssignmentInfeasible { row });
        }
    }

    Permutation::new(assignment)
        .map_err(|_| EngineError::AssignmentInfeasible { row: 0 })
}

/// Total cost of a given assignment, for diagnostics and tests.
pub fn assignment_cost(cost: &DMatrix<f64>, perm: &Permutation) -> f64 {
    perm.indices()
        .iter()
        .enumerate()
        .map(|(i, &j)| cost[(i, j)])
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[&[f64]]) -> DMatrix<f64> {
        let n = rows.len();
        DMatrix::from_fn(n, n, |i, j| rows[i][j])
    }

    #[test]
    fn identity_is_optimal_for_a_diagonal_advantage() {
        let cost = matrix(&[&[1.0, 5.0, 5.0], &[5.0, 1.0, 5.0], &[5.0, 5.0, 1.0]]);
        let perm = solve(&cost).unwrap();
        assert_eq!(perm.indices(), &[0, 1, 2]);
        assert_eq!(assignment_cost(&cost, &perm), 3.0);
    }

    #[test]
    fn solver_finds_the_off_diagonal_optimum() {
        // classic 3x3 with optimal cost 5 on the anti-diagonal-ish pattern
        let cost = matrix(&[&[4.0, 1.0, 3.0], &[2.0, 0.0, 5.0], &[3.0, 2.0, 2.0]]);
        let perm = solve(&cost).unwrap();
        assert_eq!(assignment_cost(&cost, &perm), 5.0);
        assert_eq!(perm.indices(), &[1, 0, 2]);
    }

    #[test]
    fn solver_handles_a_swap() {
        let cost = matrix(&[&[9.0, 1.0], &[1.0, 9.0]]);
        let perm = solve(&cost).unwrap();
        assert_eq!(perm.indices(), &[1, 0]);
    }

    #[test]
    fn all_sentinel_row_is_infeasible() {
        let s = COST_SENTINEL;
        let cost = matrix(&[&[1.0, s], &[s, s]]);
        let result = solve(&cost);
        assert!(matches!(
            result,
            Err(EngineError::AssignmentInfeasible { .. })
        ));
    }

    #[test]
    fn four_by_four_matches_brute_force() {
        let cost = matrix(&[
            &[7.0, 5.0, 9.0, 8.0],
            &[6.0, 4.0, 3.0, 7.0],
            &[5.0, 8.0, 1.0, 8.0],
            &[7.0, 6.0, 9.0, 4.0],
        ]);
        let perm = solve(&cost).unwrap();

        // brute force over all 24 permutations
        let mut best = f64::INFINITY;
        let indices = [0usize, 1, 2, 3];
        let mut order = indices;
        permute(&mut order, 0, &mut |candidate| {
            let total: f64 = candidate
                .iter()
                .enumerate()
                .map(|(i, &j)| cost[(i, j)])
                .sum();
            if total < best {
                best = total;
            }
        });
        assert!((assignment_cost(&cost, &perm) - best).abs() < 1e-12);
    }

    fn permute(order: &mut [usize; 4], k: usize, visit: &mut impl FnMut(&[usize; 4])) {
        if k == 4 {
            visit(order);
            return;
        }
        for i in k..4 {
            order.swap(k, i);
            permute(order, k + 1, visit);
            order.swap(k, i);
        }
    }

    #[test]
    fn empty_matrix_yields_the_empty_permutation() {
        let cost = DMatrix::<f64>::zeros(0, 0);
        assert_eq!(solve(&cost).unwrap().len(), 0);
    }
}
