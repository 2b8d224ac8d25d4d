//! Edit-distance similarity between page fragments
//!
//! Costs O(len(a) * len(b)) time, so callers pre-filter candidates by length
//! before scoring them. Lengths are counted in chars, not bytes.

/// Levenshtein distance over Unicode scalar values
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    // Keep the rolling rows as short as possible
    let (long, short) = if a.len() >= b.len() { (&a, &b) } else { (&b, &a) };
    if short.is_empty() {
        return long.len();
    }

    let mut prev: Vec<usize> = (0..=short.len()).collect();
    let mut curr = vec![0; short.len() + 1];

    for (i, lc) in long.iter().enumerate() {
        curr[0] = i + 1;
        for (j, sc) in short.iter().enumerate() {
            let substitution = prev[j] + usize::from(lc != sc);
            let insertion = curr[j] + 1;
            let deletion = prev[j + 1] + 1;
            curr[j + 1] = substitution.min(insertion).min(deletion);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[short.len()]
}

/// `(max_len - distance) / max_len`, in `[0, 1]`. Two empty strings score 1.0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = edit_distance(a, b);
    (max_len - distance) as f64 / max_len as f64
}

/// Coarse pre-filter: is `candidate_len` at least `min_ratio` of `target_len`?
pub fn passes_length_ratio(candidate_len: usize, target_len: usize, min_ratio: f64) -> bool {
    candidate_len as f64 >= target_len as f64 * min_ratio
}
