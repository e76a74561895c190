/// Relative tolerance under which two accumulated costs count as a tie.
const TIE_EPSILON: f64 = 1e-12;

const STEP_STAY: u8 = 0;
const STEP_ADVANCE: u8 = 1;

/// Monotonic DTW over a `tokens × frames` cost matrix.
///
/// Allowed steps are `(i, j-1) -> (i, j)` (token keeps the next frame) and
/// `(i-1, j-1) -> (i, j)` (next token starts). Every frame is assigned to
/// exactly one token and every token gets at least one frame, so the matrix
/// must have at least as many frames as tokens.
///
/// Returns `(token, frame)` pairs, one per frame, from `(0, 0)` to
/// `(tokens-1, frames-1)`. Ties are resolved towards the straight line
/// joining the two corners, which spreads tokens evenly on flat costs.
pub fn dtw_path(cost: &[Vec<f64>]) -> Vec<(usize, usize)> {
    let n = cost.len();
    let m = cost.first().map_or(0, Vec::len);
    if n == 0 || m == 0 || n > m {
        return Vec::new();
    }

    let mut prev = vec![f64::INFINITY; n];
    let mut curr = vec![f64::INFINITY; n];
    let mut bp = vec![STEP_STAY; n * m];

    prev[0] = cost[0][0];

    for j in 1..m {
        // Token i is reachable at frame j only if i <= j, and must leave room
        // for the remaining tokens to get one frame each.
        let lo = (n - 1).saturating_sub(m - 1 - j);
        let hi = j.min(n - 1);
        curr.iter_mut().for_each(|c| *c = f64::INFINITY);

        let bp_offset = j * n;
        for i in lo..=hi {
            let stay = prev[i];
            let advance = if i >= 1 { prev[i - 1] } else { f64::INFINITY };
            let step = best_step(stay, advance, i, j - 1, n, m);
            let best = if step == STEP_ADVANCE { advance } else { stay };
            curr[i] = best + cost[i][j];
            bp[bp_offset + i] = step;
        }

        std::mem::swap(&mut prev, &mut curr);
    }

    let mut i = n - 1;
    let mut path = Vec::with_capacity(m);
    path.push((i, m - 1));
    for j in (1..m).rev() {
        if bp[j * n + i] == STEP_ADVANCE {
            debug_assert!(i >= 1);
            i -= 1;
        }
        path.push((i, j - 1));
    }
    debug_assert_eq!(i, 0);
    path.reverse();
    path
}

#[inline(always)]
fn best_step(stay: f64, advance: f64, i: usize, prev_j: usize, n: usize, m: usize) -> u8 {
    if !advance.is_finite() {
        return STEP_STAY;
    }
    if !stay.is_finite() {
        return STEP_ADVANCE;
    }
    let scale = stay.abs().max(advance.abs()).max(1.0);
    if (stay - advance).abs() <= TIE_EPSILON * scale {
        // Compare the distance of both predecessors to the corner-to-corner line.
        let stay_dist = diagonal_distance(i, prev_j, n, m);
        let advance_dist = diagonal_distance(i - 1, prev_j, n, m);
        return if advance_dist < stay_dist {
            STEP_ADVANCE
        } else {
            STEP_STAY
        };
    }
    if advance < stay {
        STEP_ADVANCE
    } else {
        STEP_STAY
    }
}

fn diagonal_distance(i: usize, j: usize, n: usize, m: usize) -> usize {
    (i * (m - 1)).abs_diff(j * (n - 1))
}

/// Frame at which each token of a DTW path starts.
pub fn token_start_frames(path: &[(usize, usize)]) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut prev_token = None;
    for &(token, frame) in path {
        if prev_token != Some(token) {
            starts.push(frame);
        }
        prev_token = Some(token);
    }
    starts
}
