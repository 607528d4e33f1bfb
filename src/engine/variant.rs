//! Automatic choice among GoodMerge variants of one title.
//!
//! Four stable ranking passes run in order, each taking the previous ordering and
//! returning a new one. Ties always keep the incoming order, so a pass that finds
//! no tokens leaves the ranking untouched.

use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Country code weights used by the region pass (e.g. `U` → 10.0).
pub type CountryWeights = HashMap<String, f64>;

fn integer_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("static regex"))
}

fn bracket_tokens_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]*)\]").expect("static regex"))
}

fn paren_tokens_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(([^)]*)\)").expect("static regex"))
}

fn bracket_tokens(name: &str) -> Vec<&str> {
    bracket_tokens_re()
        .captures_iter(name)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

fn paren_tokens(name: &str) -> Vec<&str> {
    paren_tokens_re()
        .captures_iter(name)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Stable sort by a per-name score, returning a new sequence.
fn rank_by<S, F, C>(candidates: &[String], score: F, cmp: C) -> Vec<String>
where
    F: Fn(&str) -> S,
    C: Fn(&S, &S) -> Ordering,
{
    let mut scored: Vec<(S, &String)> = candidates.iter().map(|c| (score(c), c)).collect();
    scored.sort_by(|a, b| cmp(&a.0, &b.0));
    scored.into_iter().map(|(_, c)| c.clone()).collect()
}

/// Composite of all integer runs: the first run counts fully, each later one a
/// tenth as much as the previous.
pub fn numeric_score(name: &str) -> f64 {
    integer_runs()
        .find_iter(name)
        .enumerate()
        .map(|(i, m)| {
            let value: f64 = m.as_str().parse().unwrap_or(0.0);
            value / 10f64.powi(i as i32)
        })
        .sum()
}

/// Pass 1: larger numeric composite first.
pub fn rank_numeric(candidates: &[String]) -> Vec<String> {
    rank_by(candidates, numeric_score, |a, b| b.total_cmp(a))
}

/// Dump-quality code of the first bracketed token; lower is better.
pub fn special_code_score(name: &str) -> u8 {
    let first = bracket_tokens(name)
        .first()
        .and_then(|t| t.chars().next());
    match first {
        Some('!') => 0,
        Some('p') => 1,
        Some('a') => 2,
        Some('f') => 3,
        Some('h') => 4,
        _ => 5,
    }
}

/// Pass 2: ascending special-code value.
pub fn rank_special_code(candidates: &[String]) -> Vec<String> {
    rank_by(candidates, special_code_score, |a, b| a.cmp(b))
}

fn region_token_score(token: &str, weights: &CountryWeights) -> f64 {
    let token = token.trim();
    if let Some(w) = weights.get(token) {
        return w * 3.0;
    }

    // "USA, Europe" style lists, or packed single-letter codes such as "UE".
    let parts: Vec<String> = if token.contains(',') {
        token
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    } else {
        token.chars().map(String::from).collect()
    };
    if parts.len() >= 2 && parts.iter().all(|p| weights.contains_key(p)) {
        return parts.iter().filter_map(|p| weights.get(p)).sum();
    }

    token
        .chars()
        .filter_map(|c| weights.get(&c.to_string()).copied())
        .fold(None, |best: Option<f64>, w| Some(best.map_or(w, |b| b.max(w))))
        .map(|w| w / 2.0)
        .unwrap_or(0.0)
}

/// Sum of region scores over all parenthesized tokens of a name.
pub fn region_score(name: &str, weights: &CountryWeights) -> f64 {
    paren_tokens(name)
        .into_iter()
        .map(|t| region_token_score(t, weights))
        .sum()
}

/// Pass 3: higher region score first.
pub fn rank_region(candidates: &[String], weights: &CountryWeights) -> Vec<String> {
    rank_by(candidates, |n| region_score(n, weights), |a, b| b.total_cmp(a))
}

/// Standard-code score: a lone `[!]` is the best possible dump, otherwise the
/// best table position among bracketed tokens (position + 1, 0 when none match).
pub fn standard_code_score(name: &str, table: &[String]) -> usize {
    let tokens = bracket_tokens(name);
    if tokens.len() == 1 && tokens[0] == "!" {
        return table.len() + 1;
    }
    tokens
        .iter()
        .filter_map(|t| {
            table
                .iter()
                .rposition(|prefix| !prefix.is_empty() && t.starts_with(prefix.as_str()))
        })
        .map(|pos| pos + 1)
        .max()
        .unwrap_or(0)
}

/// Pass 4: higher standard-code score first.
pub fn rank_standard_code(candidates: &[String], table: &[String]) -> Vec<String> {
    rank_by(
        candidates,
        |n| standard_code_score(n, table),
        |a, b| b.cmp(a),
    )
}

/// Full ranking, best candidate first.
pub fn rank(
    candidates: &[String],
    country_weights: &CountryWeights,
    standard_weights: &[String],
) -> Vec<String> {
    let ranked = rank_numeric(candidates);
    let ranked = rank_special_code(&ranked);
    let ranked = rank_region(&ranked, country_weights);
    rank_standard_code(&ranked, standard_weights)
}

/// Pick the automatic choice among `candidates`. `None` only for an empty list.
pub fn select(
    candidates: &[String],
    country_weights: &CountryWeights,
    standard_weights: &[String],
) -> Option<String> {
    rank(candidates, country_weights, standard_weights)
        .into_iter()
        .next()
}
