//! Textual similarity used by consensus and refinement
//!
//! Similarity is the character-set Jaccard index `|A ∩ B| / |A ∪ B|` over the
//! distinct characters of each value's serialized form. It is deliberately
//! crude: outputs that carry the same content in a different order score as
//! identical, and a semantic measure would change agreement outcomes.

use serde::Serialize;
use std::collections::HashSet;

/// Serialized textual form of a value
///
/// This is the full JSON form, so string values keep their quotes.
pub fn text_of<T: Serialize + ?Sized>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}

/// Character-set Jaccard similarity of two strings
///
/// Two empty strings are identical (1.0); one empty side scores 0.0.
pub fn char_jaccard(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let a_chars: HashSet<char> = a.chars().collect();
    let b_chars: HashSet<char> = b.chars().collect();

    let union = a_chars.union(&b_chars).count();
    if union == 0 {
        return 1.0;
    }

    let intersection = a_chars.intersection(&b_chars).count();
    intersection as f64 / union as f64
}

/// Similarity of two serializable values; unserializable values never match
pub fn value_similarity<T: Serialize + ?Sized>(a: &T, b: &T) -> f64 {
    match (text_of(a), text_of(b)) {
        (Some(a), Some(b)) => char_jaccard(&a, &b),
        _ => 0.0,
    }
}

/// Full pairwise similarity matrix over pre-serialized texts
pub fn similarity_matrix(texts: &[String]) -> Vec<Vec<f64>> {
    let n = texts.len();
    let mut matrix = vec![vec![1.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let sim = char_jaccard(&texts[i], &texts[j]);
            matrix[i][j] = sim;
            matrix[j][i] = sim;
        }
    }
    matrix
}

/// Average similarity of each row to every other entry
///
/// A single entry has nothing to disagree with and averages 1.0.
pub fn average_similarities(matrix: &[Vec<f64>]) -> Vec<f64> {
    let n = matrix.len();
    if n <= 1 {
        return vec![1.0; n];
    }
    matrix
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let total: f64 = row
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, sim)| *sim)
                .sum();
            total / (n - 1) as f64
        })
        .collect()
}

/// Index with the highest average similarity; ties go to the first index
pub fn centroid(averages: &[f64]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, avg) in averages.iter().copied().enumerate() {
        match best {
            Some((_, best_avg)) if avg <= best_avg => {}
            _ => best = Some((idx, avg)),
        }
    }
    best
}
