//! # Group Expander
//!
//! Named, possibly nested, aliases for lists of class names.
//!
//! Groups exist only at rule-authoring time: a rule spec may name a group
//! wherever it names classes, and the expander splices the group's members
//! in place before class resolution. Expansion is depth-first and
//! order-preserving; a group referencing itself is a configuration error,
//! caught with an explicit in-progress set rather than unbounded recursion.

use crate::types::SigweaveError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// GROUP
// =============================================================================

/// A named, ordered list of member tokens.
///
/// Each token is either a literal class name or another group's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Name the group is referenced by.
    pub name: String,
    /// Member tokens, in order.
    pub classes: Vec<String>,
}

impl Group {
    /// Create a group from a name and member tokens.
    #[must_use]
    pub fn new(name: impl Into<String>, classes: Vec<String>) -> Self {
        Self {
            name: name.into(),
            classes,
        }
    }
}

// =============================================================================
// GROUPS
// =============================================================================

/// A set of groups, indexed by name, supporting recursive expansion.
#[derive(Debug, Clone, Default)]
pub struct Groups {
    members: BTreeMap<String, Vec<String>>,
}

impl Groups {
    /// Build an index from group definitions.
    ///
    /// A later group with the same name replaces an earlier one.
    #[must_use]
    pub fn new(groups: impl IntoIterator<Item = Group>) -> Self {
        let members = groups
            .into_iter()
            .map(|group| (group.name, group.classes))
            .collect();
        Self { members }
    }

    /// True if `name` is a known group.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    /// Expand a token list into leaf class names.
    ///
    /// Tokens naming a known group are replaced, depth-first, by their
    /// expanded member lists; all other tokens pass through as literals.
    /// Order is first-occurrence, left to right. Duplicate leaves reachable
    /// via multiple paths are preserved; callers that need a set dedupe
    /// downstream.
    ///
    /// Fails with [`SigweaveError::RecursiveGroup`] if a group references
    /// itself, directly or transitively.
    pub fn expand(&self, tokens: &[String]) -> Result<Vec<String>, SigweaveError> {
        let mut leaves = Vec::new();
        let mut in_progress = BTreeSet::new();
        for token in tokens {
            self.expand_into(token, &mut leaves, &mut in_progress)?;
        }
        Ok(leaves)
    }

    fn expand_into(
        &self,
        token: &str,
        leaves: &mut Vec<String>,
        in_progress: &mut BTreeSet<String>,
    ) -> Result<(), SigweaveError> {
        let Some(members) = self.members.get(token) else {
            leaves.push(token.to_string());
            return Ok(());
        };
        if !in_progress.insert(token.to_string()) {
            return Err(SigweaveError::RecursiveGroup(token.to_string()));
        }
        for member in members {
            self.expand_into(member, leaves, in_progress)?;
        }
        in_progress.remove(token);
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
