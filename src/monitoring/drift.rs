//! Label distributions and KL divergence

use std::collections::HashMap;

/// Stand-in probability for a label missing from one side
pub const EPSILON: f64 = 1e-10;

pub type Distribution = HashMap<String, f64>;

/// Normalized label frequencies; empty input gives an empty distribution
pub fn label_distribution<I, S>(labels: I) -> Distribution
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut total = 0u64;
    for label in labels {
        *counts.entry(label.as_ref().to_string()).or_insert(0) += 1;
        total += 1;
    }

    counts
        .into_iter()
        .map(|(label, count)| (label, count as f64 / total as f64))
        .collect()
}

/// `D(reference || recent)` summed over the union of both label sets
pub fn kl_divergence(reference: &Distribution, recent: &Distribution) -> f64 {
    let mut divergence = 0.0;
    for label in reference.keys().chain(recent.keys().filter(|k| !reference.contains_key(*k))) {
        let p = reference.get(label).copied().unwrap_or(EPSILON);
        let q = recent.get(label).copied().unwrap_or(EPSILON);
        if p > 0.0 {
            divergence += p * (p / q).ln();
        }
    }
    // Rounding can leave a tiny negative residue for identical inputs
    divergence.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(pairs: &[(&str, f64)]) -> Distribution {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_distribution_is_normalized() {
        let d = label_distribution(["A", "A", "B", "C"]);
        assert_eq!(d["A"], 0.5);
        assert_eq!(d["B"], 0.25);
        assert!((d.values().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input() {
        let d = label_distribution(Vec::<String>::new());
        assert!(d.is_empty());
    }

    #[test]
    fn test_identical_distributions_have_zero_divergence() {
        let p = dist(&[("A", 0.5), ("B", 0.5)]);
        assert_eq!(kl_divergence(&p, &p.clone()), 0.0);
    }

    #[test]
    fn test_missing_label_uses_epsilon() {
        let reference = dist(&[("A", 0.5), ("B", 0.5)]);
        let recent = dist(&[("A", 1.0)]);
        let score = kl_divergence(&reference, &recent);

        let expected = 0.5 * (0.5f64 / 1.0).ln() + 0.5 * (0.5 / EPSILON).ln();
        assert!((score - expected).abs() < 1e-9);
        assert!(score > 0.1);
    }

    #[test]
    fn test_label_only_in_recent_contributes() {
        let reference = dist(&[("A", 1.0)]);
        let recent = dist(&[("A", 0.5), ("B", 0.5)]);
        let score = kl_divergence(&reference, &recent);
        // A: 1 * ln(2), B: eps * ln(eps / 0.5)
        let expected = 2f64.ln() + EPSILON * (EPSILON / 0.5).ln();
        assert!((score - expected).abs() < 1e-9);
        assert!(score >= 0.0);
    }
}
