//! Node aliases: short, unique identifiers used to build variable paths
//! such as `workflow.<alias>.output`.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::{Node, NodeKind};

pub const MIN_ALIAS_LEN: usize = 2;
pub const MAX_ALIAS_LEN: usize = 20;

/// Aliases that collide with the top-level segments of variable paths.
pub const RESERVED_ALIASES: [&str; 5] = ["input", "output", "workflow", "runtime", "system"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AliasError {
    #[error("Alias is required")]
    Required,

    #[error(
        "Alias must start with a letter and contain only lowercase letters, numbers, and underscores"
    )]
    InvalidFormat,

    #[error("Alias must be 2-20 characters long")]
    InvalidLength,

    #[error("This alias is reserved and cannot be used")]
    Reserved,

    #[error("This alias is already in use by another node")]
    Duplicate,
}

/// Returns `true` if any node in `nodes` already carries `alias`.
pub fn is_alias_in_use(nodes: &[Node], alias: &str) -> bool {
    nodes.iter().any(|n| n.alias == alias)
}

/// Pick an unused alias for a new node of `kind`: the kind's base token,
/// then `base1`, `base2`, ... until one is free.
pub fn generate_unique_alias(nodes: &[Node], kind: NodeKind) -> String {
    disambiguate(nodes, kind.alias_base(), None)
}

fn disambiguate(nodes: &[Node], base: &str, exclude_node_id: Option<&str>) -> String {
    let taken = |candidate: &str| {
        RESERVED_ALIASES.contains(&candidate)
            || nodes
                .iter()
                .any(|n| n.alias == candidate && Some(n.id.as_str()) != exclude_node_id)
    };

    if !taken(base) {
        return base.to_string();
    }
    let mut counter = 1u32;
    loop {
        let candidate = format!("{base}{counter}");
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Check `candidate` against the alias rules, returning the first failure.
///
/// `exclude_node_id` names the node being edited so that it does not
/// collide with its own current alias.
pub fn validate_alias(
    nodes: &[Node],
    candidate: &str,
    exclude_node_id: Option<&str>,
) -> Result<(), AliasError> {
    if candidate.trim().is_empty() {
        return Err(AliasError::Required);
    }
    if !has_alias_format(candidate) {
        return Err(AliasError::InvalidFormat);
    }
    if !(MIN_ALIAS_LEN..=MAX_ALIAS_LEN).contains(&candidate.len()) {
        return Err(AliasError::InvalidLength);
    }
    if RESERVED_ALIASES.contains(&candidate) {
        return Err(AliasError::Reserved);
    }
    let duplicate = nodes
        .iter()
        .any(|n| n.alias == candidate && Some(n.id.as_str()) != exclude_node_id);
    if duplicate {
        return Err(AliasError::Duplicate);
    }
    Ok(())
}

static ALIAS_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid alias regex"));

fn has_alias_format(candidate: &str) -> bool {
    ALIAS_FORMAT.is_match(candidate)
}

/// Derive an alias-shaped token from free text such as a node label.
///
/// The result follows the alias format when non-empty but is not checked for
/// uniqueness or reserved words.
pub fn sanitize_alias(text: &str) -> String {
    let lowered = text.to_lowercase();

    let mut joined = String::with_capacity(lowered.len());
    let mut in_space = false;
    for ch in lowered.chars() {
        if ch.is_whitespace() {
            if !in_space {
                joined.push('_');
                in_space = true;
            }
        } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            joined.push(ch);
            in_space = false;
        }
    }

    let trimmed: String = joined
        .trim_start_matches(|c: char| !c.is_ascii_lowercase())
        .chars()
        .take(MAX_ALIAS_LEN)
        .collect();
    trimmed.trim_end_matches('_').to_string()
}

/// Sanitize `text` and make the result usable as an alias for the node
/// `exclude_node_id`: falls back to `node` when nothing usable remains and
/// appends a numeric suffix when the token is reserved or taken.
pub fn suggest_alias(nodes: &[Node], text: &str, exclude_node_id: Option<&str>) -> String {
    let mut base = sanitize_alias(text);
    // Leave room for the numeric suffix.
    base.truncate(MAX_ALIAS_LEN - 3);
    let base = base.trim_end_matches('_');
    let base = if base.len() < MIN_ALIAS_LEN {
        NodeKind::FALLBACK_ALIAS_BASE
    } else {
        base
    };
    disambiguate(nodes, base, exclude_node_id)
}
