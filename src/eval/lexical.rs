/// Lexical overlap metrics: BLEU, METEOR, ROUGE and token length.
///
/// All functions score one prediction against one reference and are pure, so
/// they can run on any worker.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

fn word_or_symbol() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}_]+|[^\s\p{L}\p{N}_]").ok()).as_ref()
}

/// Words and individual punctuation marks, case preserved.
pub fn bleu_tokens(text: &str) -> Vec<String> {
    match word_or_symbol() {
        Some(re) => re.find_iter(text).map(|m| m.as_str().to_string()).collect(),
        None => text.split_whitespace().map(str::to_string).collect(),
    }
}

/// Lowercased alphanumeric runs; everything else separates tokens.
pub fn rouge_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lowercased words and punctuation marks.
pub fn meteor_tokens(text: &str) -> Vec<String> {
    bleu_tokens(&text.to_lowercase())
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if n == 0 || tokens.len() < n {
        return counts;
    }
    for window in tokens.windows(n) {
        *counts.entry(window).or_insert(0) += 1;
    }
    counts
}

/// Clipped n-gram matches and candidate n-gram total.
fn clipped_matches(reference: &[String], candidate: &[String], n: usize) -> (usize, usize) {
    let ref_counts = ngram_counts(reference, n);
    let cand_counts = ngram_counts(candidate, n);
    let matches = cand_counts
        .iter()
        .map(|(ng, count)| (*count).min(ref_counts.get(ng).copied().unwrap_or(0)))
        .sum();
    (matches, candidate.len().saturating_sub(n.saturating_sub(1)))
}

/// Corpus-style BLEU for a single pair: geometric mean of the clipped
/// precisions up to `max_order`, times the brevity penalty. No smoothing, so
/// any order without a match scores 0.
pub fn bleu(prediction: &str, reference: &str, max_order: usize) -> f64 {
    let candidate = bleu_tokens(prediction);
    let reference = bleu_tokens(reference);
    if candidate.is_empty() || max_order == 0 {
        return 0.0;
    }

    let mut log_sum = 0.0;
    for n in 1..=max_order {
        let (matches, total) = clipped_matches(&reference, &candidate, n);
        if matches == 0 || total == 0 {
            return 0.0;
        }
        log_sum += (matches as f64 / total as f64).ln();
    }
    let geo_mean = (log_sum / max_order as f64).exp();

    let c = candidate.len() as f64;
    let r = reference.len() as f64;
    let brevity_penalty = if c > r { 1.0 } else { (1.0 - r / c).exp() };

    geo_mean * brevity_penalty
}

/// Mean of BLEU at max orders 1 through 4.
pub fn bleu_averaged(prediction: &str, reference: &str) -> f64 {
    (1..=4).map(|order| bleu(prediction, reference, order)).sum::<f64>() / 4.0
}

/// Precision, recall and F-measure of one ROUGE variant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RougeScore {
    pub precision: f64,
    pub recall: f64,
    pub fmeasure: f64,
}

impl RougeScore {
    fn from_counts(overlap: usize, candidate: usize, reference: usize) -> Self {
        if overlap == 0 || candidate == 0 || reference == 0 {
            return RougeScore::default();
        }
        let precision = overlap as f64 / candidate as f64;
        let recall = overlap as f64 / reference as f64;
        RougeScore {
            precision,
            recall,
            fmeasure: 2.0 * precision * recall / (precision + recall),
        }
    }
}

/// ROUGE-1, ROUGE-2 and ROUGE-L for one pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RougeScores {
    pub rouge1: RougeScore,
    pub rouge2: RougeScore,
    pub rouge_l: RougeScore,
}

pub fn rouge_n(prediction: &str, reference: &str, n: usize) -> RougeScore {
    let candidate = rouge_tokens(prediction);
    let reference = rouge_tokens(reference);
    let (overlap, cand_total) = clipped_matches(&reference, &candidate, n);
    RougeScore::from_counts(overlap, cand_total, reference.len().saturating_sub(n.saturating_sub(1)))
}

pub fn rouge_l(prediction: &str, reference: &str) -> RougeScore {
    let candidate = rouge_tokens(prediction);
    let reference = rouge_tokens(reference);
    RougeScore::from_counts(lcs_length(&candidate, &reference), candidate.len(), reference.len())
}

pub fn rouge(prediction: &str, reference: &str) -> RougeScores {
    RougeScores {
        rouge1: rouge_n(prediction, reference, 1),
        rouge2: rouge_n(prediction, reference, 2),
        rouge_l: rouge_l(prediction, reference),
    }
}

/// Longest common subsequence length in O(min(m, n)) space.
fn lcs_length(a: &[String], b: &[String]) -> usize {
    let (short, long) = if a.len() < b.len() { (a, b) } else { (b, a) };
    let mut prev = vec![0usize; short.len() + 1];
    let mut curr = vec![0usize; short.len() + 1];

    for i in 1..=long.len() {
        for j in 1..=short.len() {
            curr[j] = if long[i - 1] == short[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[short.len()]
}

const METEOR_ALPHA: f64 = 0.9;
const METEOR_BETA: f64 = 3.0;
const METEOR_GAMMA: f64 = 0.5;

/// METEOR with exact token matching.
///
/// Each prediction token is aligned to the first unused identical reference
/// token. The harmonic mean weights recall by `alpha` and the fragmentation
/// penalty is `gamma * (chunks / matches)^beta`.
pub fn meteor(prediction: &str, reference: &str) -> f64 {
    let hypothesis = meteor_tokens(prediction);
    let reference = meteor_tokens(reference);
    if hypothesis.is_empty() || reference.is_empty() {
        return 0.0;
    }

    let mut used = vec![false; reference.len()];
    let mut alignment: Vec<(usize, usize)> = Vec::new();
    for (h, token) in hypothesis.iter().enumerate() {
        if let Some(r) = (0..reference.len()).find(|&r| !used[r] && reference[r] == *token) {
            used[r] = true;
            alignment.push((h, r));
        }
    }

    let matches = alignment.len();
    if matches == 0 {
        return 0.0;
    }

    // contiguous runs in both hypothesis and reference
    let chunks = 1 + alignment
        .windows(2)
        .filter(|w| !(w[1].0 == w[0].0 + 1 && w[1].1 == w[0].1 + 1))
        .count();

    let precision = matches as f64 / hypothesis.len() as f64;
    let recall = matches as f64 / reference.len() as f64;
    let fmean = precision * recall / (METEOR_ALPHA * precision + (1.0 - METEOR_ALPHA) * recall);
    let penalty = METEOR_GAMMA * (chunks as f64 / matches as f64).powf(METEOR_BETA);

    fmean * (1.0 - penalty)
}

/// Whitespace token count.
pub fn token_length(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_bleu_identical_is_one() {
        let s = "the cat sat on the mat";
        assert!(close(bleu(s, s, 4), 1.0));
        assert!(close(bleu_averaged(s, s), 1.0));
    }

    #[test]
    fn test_bleu_no_overlap_is_zero() {
        assert_eq!(bleu("hello there", "completely different words", 1), 0.0);
        assert_eq!(bleu("", "reference", 1), 0.0);
    }

    #[test]
    fn test_bleu_unigram_with_brevity_penalty() {
        // 2 of 2 unigrams match; candidate 2 tokens, reference 4 tokens
        let score = bleu("the cat", "the cat sat down", 1);
        assert!(close(score, (1.0f64 - 2.0).exp()));
    }

    #[test]
    fn test_bleu_higher_orders_need_matches() {
        // unigrams match but no bigram does
        assert_eq!(bleu("cat the", "the cat", 2), 0.0);
        assert!(bleu_averaged("cat the", "the cat") > 0.0);
    }

    #[test]
    fn test_rouge_scores() {
        let scores = rouge("The cat sat", "the cat sat on the mat");
        assert!(close(scores.rouge1.precision, 1.0));
        assert!(close(scores.rouge1.recall, 0.5));
        assert!(close(scores.rouge1.fmeasure, 2.0 / 3.0));
        assert!(close(scores.rouge2.precision, 1.0));
        assert!(close(scores.rouge2.recall, 2.0 / 5.0));
        assert!(close(scores.rouge_l.fmeasure, 2.0 / 3.0));
    }

    #[test]
    fn test_rouge_ignores_punctuation_and_case() {
        let scores = rouge("Hello, WORLD!", "hello world");
        assert!(close(scores.rouge1.fmeasure, 1.0));
        assert!(close(scores.rouge_l.fmeasure, 1.0));
    }

    #[test]
    fn test_lcs_length() {
        let a: Vec<String> = "a b c d e".split(' ').map(String::from).collect();
        let b: Vec<String> = "b x c d".split(' ').map(String::from).collect();
        assert_eq!(lcs_length(&a, &b), 3);
    }

    #[test]
    fn test_meteor_perfect_single_chunk() {
        let s = "i like green tea";
        // one chunk over four matches
        let expected = 1.0 - 0.5 * (0.25f64).powi(3);
        assert!(close(meteor(s, s), expected));
    }

    #[test]
    fn test_meteor_fragmentation_lowers_score() {
        let ordered = meteor("i like green tea", "i like green tea");
        let shuffled = meteor("tea green like i", "i like green tea");
        assert!(shuffled < ordered);
        assert_eq!(meteor("nothing", "in common"), 0.0);
    }

    #[test]
    fn test_token_length() {
        assert_eq!(token_length("  a b\tc\n"), 3);
        assert_eq!(token_length(""), 0);
    }
}
