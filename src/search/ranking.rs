//! Result ranking: base similarity plus small, individually reported bonuses

use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::node::{Node, NodeKind};

pub const EXACT_NAME_BONUS: f32 = 0.30;
pub const NAME_SUBSTRING_BONUS: f32 = 0.20;
pub const SIGNATURE_BONUS: f32 = 0.15;
pub const MAX_RECENCY_BONUS: f32 = 0.10;
pub const RECENCY_WINDOW_DAYS: f32 = 30.0;
pub const POPULAR_LANGUAGE_BONUS: f32 = 0.02;

const POPULAR_LANGUAGES: &[&str] = &["typescript", "javascript", "python", "rust", "go", "java"];

/// Why a result scored what it did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum MatchReason {
    SemanticSimilarity { score: f32 },
    TextMatch { score: f32 },
    ExactName { bonus: f32 },
    NameSubstring { bonus: f32 },
    SignatureMatch { bonus: f32 },
    NodeType { bonus: f32 },
    Recency { bonus: f32, days: f32 },
    PopularLanguage { bonus: f32 },
}

impl MatchReason {
    /// Contribution to the final score
    pub fn value(&self) -> f32 {
        match self {
            MatchReason::SemanticSimilarity { score } | MatchReason::TextMatch { score } => *score,
            MatchReason::ExactName { bonus }
            | MatchReason::NameSubstring { bonus }
            | MatchReason::SignatureMatch { bonus }
            | MatchReason::NodeType { bonus }
            | MatchReason::Recency { bonus, .. }
            | MatchReason::PopularLanguage { bonus } => *bonus,
        }
    }
}

/// Preference between entity types when other signals tie
pub fn type_weight(kind: NodeKind) -> f32 {
    match kind {
        NodeKind::Function => 0.10,
        NodeKind::ArrowFunction | NodeKind::Class => 0.08,
        NodeKind::Test => 0.06,
        NodeKind::File => 0.05,
        NodeKind::Commit => 0.04,
        NodeKind::PullRequest | NodeKind::Variable => 0.03,
        NodeKind::Repository | NodeKind::Import | NodeKind::Export => 0.02,
    }
}

/// Lowercase terms of a query or identifier; camelCase and snake_case are split
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in text.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens.retain(|t| t.len() > 1);
    tokens
}

/// Substring/token score used when no vector is available:
/// 1.0 exact name, 0.7 name contains the query, 0.5 any searchable text
/// contains it, otherwise up to 0.4 by the share of query terms found.
pub fn text_score(node: &Node, query: &str) -> f32 {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 0.0;
    }
    let name = node.name().to_lowercase();
    if name == query {
        return 1.0;
    }
    if name.contains(&query) {
        return 0.7;
    }
    let text = node.searchable_text().to_lowercase();
    if text.contains(&query) {
        return 0.5;
    }

    let terms = tokenize(&query);
    if terms.is_empty() {
        return 0.0;
    }
    let haystack: Vec<String> = tokenize(&node.searchable_text());
    let found = terms.iter().filter(|t| haystack.iter().any(|h| h.contains(t.as_str()))).count();
    0.4 * found as f32 / terms.len() as f32
}

/// Bonuses for one candidate. `language` is the language of the node's file
/// when it is known.
pub fn bonuses(node: &Node, query: &str, language: Option<&str>, now: DateTime<Utc>) -> Vec<MatchReason> {
    let mut reasons = Vec::new();
    let query_lower = query.trim().to_lowercase();
    let name = node.name().to_lowercase();
    let compact_query: String = query_lower.chars().filter(|c| !c.is_whitespace()).collect();

    if name == query_lower || (!compact_query.is_empty() && name == compact_query) {
        reasons.push(MatchReason::ExactName { bonus: EXACT_NAME_BONUS });
    } else if !query_lower.is_empty() && (name.contains(&query_lower) || name.contains(&compact_query)) {
        reasons.push(MatchReason::NameSubstring { bonus: NAME_SUBSTRING_BONUS });
    }

    if let Some(signature) = node.signature() {
        if !query_lower.is_empty() && signature.to_lowercase().contains(&query_lower) {
            reasons.push(MatchReason::SignatureMatch { bonus: SIGNATURE_BONUS });
        }
    }

    reasons.push(MatchReason::NodeType { bonus: type_weight(node.kind()) });

    if let Some(modified) = node.modified_at() {
        let days = (now - modified).num_seconds().max(0) as f32 / 86_400.0;
        if days < RECENCY_WINDOW_DAYS {
            let bonus = MAX_RECENCY_BONUS * (1.0 - days / RECENCY_WINDOW_DAYS);
            reasons.push(MatchReason::Recency { bonus, days });
        }
    }

    let language = language.or_else(|| node.language()).map(str::to_lowercase);
    if language.is_some_and(|l| POPULAR_LANGUAGES.contains(&l.as_str())) {
        reasons.push(MatchReason::PopularLanguage { bonus: POPULAR_LANGUAGE_BONUS });
    }

    reasons
}
