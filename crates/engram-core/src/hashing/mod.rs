//! Hashing & Similarity primitives
//!
//! Tokenization, n-gram hashing with a reproducible prime-table hash
//! family, minhash LSH signatures over character trigrams, and the
//! similarity measures (Jaccard, cosine, Levenshtein) the layers build on.
//!
//! Everything in this module is a pure function: no IO, no failure modes.
//! Empty inputs produce defined sentinels rather than errors.

use std::collections::HashSet;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default LSH band count.
pub const LSH_BANDS: usize = 10;

/// Default minhash rows per band.
pub const LSH_ROWS_PER_BAND: usize = 5;

/// Fixed prime table the hash family draws its `(a, b)` pairs from.
/// The table is part of the on-disk format: factual-layer buckets are
/// only stable across versions as long as these values never change.
const PRIMES: [i64; 16] = [
    2_147_483_647,
    1_000_000_007,
    998_244_353,
    805_306_457,
    402_653_189,
    201_326_611,
    100_663_319,
    50_331_653,
    25_165_843,
    12_582_917,
    6_291_469,
    3_145_739,
    1_572_869,
    786_433,
    393_241,
    196_613,
];

// ============================================================================
// TOKENIZATION & N-GRAMS
// ============================================================================

/// Lowercase and split on any non-word character.
///
/// A "word" character is alphanumeric or underscore; everything else is a
/// separator. Empty fragments are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Consecutive n-grams over a token slice, joined with a single space.
///
/// Returns the empty vec when fewer than `n` tokens exist or `n` is zero.
pub fn ngrams(tokens: &[String], n: usize) -> Vec<String> {
    if n == 0 || tokens.len() < n {
        return Vec::new();
    }
    tokens.windows(n).map(|w| w.join(" ")).collect()
}

// ============================================================================
// HASH FAMILY
// ============================================================================

/// Fold a string into a 63-bit integer (wrapping polynomial, base 31).
fn string_seed(s: &str) -> i64 {
    let mut x: i64 = 0;
    for b in s.bytes() {
        x = x.wrapping_mul(31).wrapping_add(i64::from(b));
    }
    x
}

/// The reproducible hash family: `h(x) = |((a * x) XOR b) mod m|`.
///
/// `(a, b)` are drawn from the fixed prime table, indexed by
/// `(n + k) mod P` and `(n * k) mod P`.
pub fn family_hash(x: i64, n: usize, k: usize, table_size: usize) -> usize {
    let p = PRIMES.len();
    let a = PRIMES[(n + k) % p];
    let b = PRIMES[(n.wrapping_mul(k)) % p];
    let m = table_size.max(1) as i64;
    (((a.wrapping_mul(x)) ^ b) % m).unsigned_abs() as usize
}

/// Hash the `k`-th n-gram variant of a token sequence into a bucket.
///
/// Joins the tokens' n-grams and hashes each through the family; returns
/// one bucket per n-gram.
pub fn ngram_hashes(tokens: &[String], n: usize, k: usize, table_size: usize) -> Vec<usize> {
    ngrams(tokens, n)
        .iter()
        .map(|gram| family_hash(string_seed(gram), n, k, table_size))
        .collect()
}

// ============================================================================
// LSH SIGNATURES
// ============================================================================

/// Character trigram shingles of the lowercased text.
///
/// Whitespace runs are collapsed to single spaces first so formatting does
/// not perturb the shingle set. Texts shorter than three characters yield
/// a single shingle of the whole text.
fn trigram_shingles(text: &str) -> Vec<String> {
    let normalized: String = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() < 3 {
        return vec![normalized];
    }
    chars.windows(3).map(|w| w.iter().collect()).collect()
}

/// Minhash-banded LSH signatures for near-duplicate candidate lookup.
///
/// Computes a minhash signature of `bands * rows_per_band` values over the
/// text's character trigrams, then collapses each band of rows into an
/// 8-hex-char band key (truncated MD5). Two texts sharing any band key are
/// LSH candidates.
///
/// Empty text produces the empty vec.
pub fn lsh_signatures(text: &str, bands: usize, rows_per_band: usize) -> Vec<String> {
    let shingles = trigram_shingles(text);
    if shingles.is_empty() || bands == 0 || rows_per_band == 0 {
        return Vec::new();
    }

    let seeds: Vec<i64> = shingles.iter().map(|s| string_seed(s)).collect();
    let total_rows = bands * rows_per_band;

    // Minhash: row i keeps the minimum of hash function i over all shingles.
    let mut signature = Vec::with_capacity(total_rows);
    for row in 0..total_rows {
        let min = seeds
            .iter()
            .map(|&x| family_hash(x, row + 1, row + 7, usize::MAX >> 1))
            .min()
            .unwrap_or(0);
        signature.push(min);
    }

    // Collapse each band into a truncated-MD5 key, prefixed with the band
    // index so keys from different bands never collide with each other.
    let mut keys = Vec::with_capacity(bands);
    for band in 0..bands {
        let rows = &signature[band * rows_per_band..(band + 1) * rows_per_band];
        let joined = rows
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let digest = md5::compute(format!("{}:{}", band, joined));
        let hex = format!("{:x}", digest);
        keys.push(format!("{}:{}", band, &hex[..8]));
    }
    keys
}

/// LSH signatures with the default band geometry (10 bands x 5 rows).
pub fn default_lsh_signatures(text: &str) -> Vec<String> {
    lsh_signatures(text, LSH_BANDS, LSH_ROWS_PER_BAND)
}

// ============================================================================
// SIMILARITY MEASURES
// ============================================================================

/// Jaccard similarity of two string sets. Both empty → 1.0.
pub fn jaccard<S: std::hash::BuildHasher>(
    a: &HashSet<String, S>,
    b: &HashSet<String, S>,
) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 1.0;
    }
    intersection as f64 / union as f64
}

/// Token-level Jaccard similarity of two texts.
pub fn content_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = tokenize(a).into_iter().collect();
    let set_b: HashSet<String> = tokenize(b).into_iter().collect();
    jaccard(&set_a, &set_b)
}

/// Jaccard similarity of two texts' LSH band-key sets.
pub fn band_similarity(a: &str, b: &str) -> f64 {
    let bands_a: HashSet<String> = default_lsh_signatures(a).into_iter().collect();
    let bands_b: HashSet<String> = default_lsh_signatures(b).into_iter().collect();
    jaccard(&bands_a, &bands_b)
}

/// Cosine similarity between two vectors.
///
/// Mismatched lengths or zero-norm inputs return 0.0.
pub fn cosine_similarity(v1: &[f32], v2: &[f32]) -> f64 {
    if v1.len() != v2.len() || v1.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm1 = 0.0f64;
    let mut norm2 = 0.0f64;
    for (a, b) in v1.iter().zip(v2.iter()) {
        dot += f64::from(*a) * f64::from(*b);
        norm1 += f64::from(*a) * f64::from(*a);
        norm2 += f64::from(*b) * f64::from(*b);
    }
    if norm1 == 0.0 || norm2 == 0.0 {
        return 0.0;
    }
    dot / (norm1.sqrt() * norm2.sqrt())
}

/// Normalized Levenshtein similarity: `1 - distance / max_len`.
///
/// Both empty → 1.0. Operates on chars, not bytes.
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let max_len = a_chars.len().max(b_chars.len());
    if max_len == 0 {
        return 1.0;
    }
    let dist = levenshtein(&a_chars, &b_chars);
    1.0 - dist as f64 / max_len as f64
}

/// Two-row Levenshtein distance.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_lowercases_and_splits() {
        assert_eq!(
            tokenize("Hello, World! foo_bar x2"),
            vec!["hello", "world", "foo_bar", "x2"]
        );
        assert!(tokenize("...!!!").is_empty());
    }

    #[test]
    fn test_ngrams_windows() {
        let tokens = tokenize("the quick brown fox");
        assert_eq!(ngrams(&tokens, 2), vec!["the quick", "quick brown", "brown fox"]);
        assert!(ngrams(&tokens, 5).is_empty());
        assert!(ngrams(&tokens, 0).is_empty());
    }

    #[test]
    fn test_family_hash_reproducible() {
        let x = string_seed("deploy v2.0");
        let h1 = family_hash(x, 2, 3, 1_000_000);
        let h2 = family_hash(x, 2, 3, 1_000_000);
        assert_eq!(h1, h2);
        assert!(h1 < 1_000_000);

        // Different (n, k) picks different primes
        let h3 = family_hash(x, 3, 2, 1_000_000);
        let h4 = family_hash(x, 1, 1, 1_000_000);
        assert!(h1 == h3 || h1 != h4, "family indexing must be deterministic");
    }

    #[test]
    fn test_lsh_signature_shape() {
        let keys = lsh_signatures("the database connection pool was exhausted", 10, 5);
        assert_eq!(keys.len(), 10);
        for (i, key) in keys.iter().enumerate() {
            let (band, hex) = key.split_once(':').unwrap();
            assert_eq!(band.parse::<usize>().unwrap(), i);
            assert_eq!(hex.len(), 8);
        }
    }

    #[test]
    fn test_lsh_identical_texts_share_all_bands() {
        let a = default_lsh_signatures("postgres connection string for localhost");
        let b = default_lsh_signatures("postgres connection string for localhost");
        assert_eq!(a, b);
    }

    #[test]
    fn test_lsh_unrelated_texts_share_no_bands() {
        let a: HashSet<String> =
            default_lsh_signatures("postgres connection string for localhost")
                .into_iter()
                .collect();
        let b: HashSet<String> =
            default_lsh_signatures("weather tomorrow will be sunny with light wind")
                .into_iter()
                .collect();
        assert_eq!(a.intersection(&b).count(), 0);
    }

    #[test]
    fn test_lsh_empty_text() {
        assert!(default_lsh_signatures("").is_empty());
        assert!(default_lsh_signatures("   ").is_empty());
    }

    #[test]
    fn test_content_similarity() {
        assert!((content_similarity("a b c", "a b c") - 1.0).abs() < 1e-9);
        assert!((content_similarity("a b", "c d")).abs() < 1e-9);
        let partial = content_similarity("the api key", "the api token");
        assert!(partial > 0.0 && partial < 1.0);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_levenshtein_similarity() {
        assert!((levenshtein_similarity("", "") - 1.0).abs() < 1e-9);
        assert!((levenshtein_similarity("abc", "abc") - 1.0).abs() < 1e-9);
        assert!((levenshtein_similarity("kitten", "sitting") - (1.0 - 3.0 / 7.0)).abs() < 1e-9);
        assert!(levenshtein_similarity("abc", "").abs() < 1e-9);
    }
}
