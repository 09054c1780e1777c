//! Business keys - stable, run-independent identity for every graph entity
//!
//! Format: `<kind>:<component>#<component>...`
//!
//! Examples:
//! - `repo:acme#billing`
//! - `file:repo:acme#billing#3f2a9c1#src/invoice.ts`
//! - `fn:file:repo:acme#billing#3f2a9c1#src/invoice.ts#calculateSum@12`
//!
//! Surrogate node ids are regenerated on every indexing run; business keys
//! are derived purely from what the entity *is*, so upserts and traversal
//! joins keep working across runs.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deterministic identity of one logical entity in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessKey(String);

impl BusinessKey {
    fn derive(prefix: &str, parts: &[&str]) -> Self {
        let mut key = String::with_capacity(prefix.len() + parts.iter().map(|p| p.len() + 1).sum::<usize>());
        key.push_str(prefix);
        key.push(':');
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                key.push('#');
            }
            key.push_str(part.trim());
        }
        Self(key)
    }

    /// The kind prefix (`repo`, `file`, `fn`, ...)
    pub fn prefix(&self) -> &str {
        self.0.split_once(':').map(|(p, _)| p).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BusinessKey {
    type Err = Error;

    /// Accept an already-derived key (as read back from storage or a CLI flag)
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once(':') {
            Some((prefix, rest)) if !prefix.is_empty() && !rest.is_empty() => Ok(Self(s.to_string())),
            _ => Err(Error::InvalidInput(format!("Not a business key: {}", s))),
        }
    }
}

impl From<BusinessKey> for String {
    fn from(key: BusinessKey) -> Self {
        key.0
    }
}

impl AsRef<str> for BusinessKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.trim_start_matches("./").trim_start_matches('/').to_string()
}

pub fn repository(org: &str, name: &str) -> BusinessKey {
    BusinessKey::derive("repo", &[org, name])
}

pub fn file(repo_id: &BusinessKey, commit_sha: &str, path: &str) -> BusinessKey {
    BusinessKey::derive("file", &[repo_id.as_str(), commit_sha, &normalize_path(path)])
}

pub fn function(file_key: &BusinessKey, name: &str, decl_line: u32) -> BusinessKey {
    BusinessKey::derive("fn", &[file_key.as_str(), &format!("{}@{}", name.trim(), decl_line)])
}

pub fn variable(file_key: &BusinessKey, name: &str, decl_line: u32) -> BusinessKey {
    BusinessKey::derive("var", &[file_key.as_str(), &format!("{}@{}", name.trim(), decl_line)])
}

pub fn class(file_key: &BusinessKey, name: &str) -> BusinessKey {
    BusinessKey::derive("class", &[file_key.as_str(), name])
}

pub fn import(file_key: &BusinessKey, decl_line: u32) -> BusinessKey {
    BusinessKey::derive("import", &[file_key.as_str(), &decl_line.to_string()])
}

pub fn export(file_key: &BusinessKey, export_name: &str) -> BusinessKey {
    BusinessKey::derive("export", &[file_key.as_str(), export_name])
}

pub fn commit(repo_id: &BusinessKey, sha: &str) -> BusinessKey {
    BusinessKey::derive("commit", &[repo_id.as_str(), &sha.to_lowercase()])
}

pub fn test(file_key: &BusinessKey, name: &str, decl_line: u32) -> BusinessKey {
    BusinessKey::derive("test", &[file_key.as_str(), &format!("{}@{}", name.trim(), decl_line)])
}

pub fn pull_request(repo_id: &BusinessKey, number: u64) -> BusinessKey {
    BusinessKey::derive("pr", &[repo_id.as_str(), &number.to_string()])
}

/// BLAKE3 digest of a normalised signature, used for duplicate/change detection.
pub fn signature_hash(signature: &str) -> String {
    let normalized: String = signature.split_whitespace().collect::<Vec<_>>().join(" ");
    blake3::hash(normalized.as_bytes()).to_hex().to_string()
}

/// Target of a relationship as seen by queries.
///
/// A call whose callee could not be resolved during extraction is kept as
/// `Unresolved` with the raw symbol name; it never gets a made-up key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "value")]
pub enum Reference {
    Resolved(BusinessKey),
    Unresolved(String),
}

impl Reference {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Reference::Resolved(_))
    }

    pub fn business_key(&self) -> Option<&BusinessKey> {
        match self {
            Reference::Resolved(key) => Some(key),
            Reference::Unresolved(_) => None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Resolved(key) => write!(f, "{}", key),
            Reference::Unresolved(name) => write!(f, "<unresolved {}>", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_deterministic() {
        let repo_a = repository("acme", "billing");
        let repo_b = repository("acme", "billing");
        assert_eq!(repo_a, repo_b);

        let file_a = file(&repo_a, "abc123", "src/invoice.ts");
        let file_b = file(&repo_b, "abc123", "./src/invoice.ts");
        assert_eq!(file_a, file_b);

        assert_eq!(function(&file_a, "calculateSum", 12), function(&file_b, "calculateSum", 12));
    }

    #[test]
    fn test_key_layout() {
        let repo = repository("acme", "billing");
        assert_eq!(repo.as_str(), "repo:acme#billing");

        let file_key = file(&repo, "abc123", "src\\invoice.ts");
        assert_eq!(file_key.as_str(), "file:repo:acme#billing#abc123#src/invoice.ts");
        assert_eq!(file_key.prefix(), "file");

        let func = function(&file_key, "calculateSum", 12);
        assert!(func.as_str().ends_with("#calculateSum@12"));
        assert_eq!(func.prefix(), "fn");

        // the key shown in `hikma --help`
        let help = function(&file(&repo, "abc", "src/math.ts"), "calculateSum", 1);
        assert_eq!(help.as_str(), "fn:file:repo:acme#billing#abc#src/math.ts#calculateSum@1");
        assert_eq!(help, "fn:file:repo:acme#billing#abc#src/math.ts#calculateSum@1".parse().unwrap());
    }

    #[test]
    fn test_distinct_entities_get_distinct_keys() {
        let repo = repository("acme", "billing");
        let file_key = file(&repo, "abc123", "src/a.ts");
        assert_ne!(function(&file_key, "run", 1), function(&file_key, "run", 20));
        assert_ne!(function(&file_key, "run", 1), variable(&file_key, "run", 1));
        assert_ne!(import(&file_key, 1), import(&file_key, 2));
        assert_ne!(commit(&repo, "ABC"), commit(&repository("acme", "web"), "abc"));
        assert_eq!(commit(&repo, "ABC"), commit(&repo, "abc"));
    }

    #[test]
    fn test_parse_business_key() {
        let key: BusinessKey = "fn:file:x#y@1".parse().unwrap();
        assert_eq!(key.prefix(), "fn");
        assert!("nokind".parse::<BusinessKey>().is_err());
        assert!(":empty".parse::<BusinessKey>().is_err());
    }

    #[test]
    fn test_signature_hash_ignores_whitespace() {
        assert_eq!(
            signature_hash("fn add(a: i32,  b: i32)"),
            signature_hash("fn add(a: i32, b: i32)")
        );
        assert_ne!(signature_hash("fn add(a: i32)"), signature_hash("fn sub(a: i32)"));
    }
}
