//! Residual assignment of still-untracked objects.
//!
//! After division and fusion have claimed their objects, the remaining
//! previous/current pairs are matched greedily: an edge is committed only when
//! it is the row minimum and the column minimum at the same time (mutual
//! nearest neighbours). Committed rows and columns are cleared and the search
//! repeats until no finite cost is left.

use crate::matrix::Matrix;

/// Copy of `cost` keeping only eligible rows and columns.
///
/// # Arguments
/// * `cost` - Cost matrix (n_prev x n_cur)
/// * `rows` - `rows[i - 1]` is true when previous label `i` may still be matched
/// * `cols` - `cols[j - 1]` is true when current label `j` may still be claimed
pub fn restrict_cost(cost: &Matrix, rows: &[bool], cols: &[bool]) -> Matrix {
    let mut local = cost.clone();
    for i in 1..=local.rows() {
        if !rows.get(i - 1).copied().unwrap_or(false) {
            local.fill_row(i, f64::NAN);
        }
    }
    for j in 1..=local.cols() {
        if !cols.get(j - 1).copied().unwrap_or(false) {
            local.fill_col(j, f64::NAN);
        }
    }
    local
}

/// Match rows to columns by repeated mutual-minimum selection.
///
/// # Arguments
/// * `cost` - Working cost matrix; `NaN` marks forbidden pairs. Consumed
///   rows and columns are set to `NaN` in place.
///
/// # Returns
/// `(row, col)` pairs (1-based) in the order they were committed.
pub fn assign_mutual_nearest(cost: &mut Matrix) -> Vec<(usize, usize)> {
    let mut matches = Vec::new();

    while cost.any_finite() {
        let row_min = cost.row_min();
        let col_min = cost.col_min();
        let before = matches.len();

        for i in 1..=cost.rows() {
            let Some(j) = row_min.index(i) else {
                continue;
            };
            if col_min.index(j) == Some(i) {
                matches.push((i, j));
                cost.fill_col(j, f64::NAN);
                cost.fill_row(i, f64::NAN);
            }
        }

        // the first lowest entry in column order is always mutual
        debug_assert!(matches.len() > before, "round committed no pair");
    }

    matches
}
