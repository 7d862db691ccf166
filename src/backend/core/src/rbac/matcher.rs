//! Permission matching strategies.
//!
//! `has_permission_to` runs through a [`PermissionMatcher`] picked from
//! configuration:
//!
//! | Strategy          | Behaviour                                                        |
//! |-------------------|------------------------------------------------------------------|
//! | [`ExactMatcher`]    | Resolve the stored permission, then check the assignment table |
//! | [`WildcardMatcher`] | Match the requested string hierarchically against held names   |
//!
//! Wildcard grammar: parts are separated by `.`, alternatives inside a part by
//! `,`, and `*` matches anything in its part. `posts.*` implies `posts.edit`,
//! `posts.edit,delete` implies `posts.delete`, and `posts` implies every
//! permission under `posts`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::PermissionConfig;
use crate::error::{Result, WarrantError};

const WILDCARD_TOKEN: &str = "*";
const PART_DELIMITER: char = '.';
const SUBPART_DELIMITER: char = ',';

// ═══════════════════════════════════════════════════════════════════════════════
// Strategy trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Decides whether a held permission satisfies a required one.
pub trait PermissionMatcher: Send + Sync + fmt::Debug {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Exact matching compares stored ids, so the required permission must
    /// exist; wildcard matching works on raw strings.
    fn requires_stored_permission(&self) -> bool;

    /// Whether holding `granted` satisfies `required`.
    fn implies(&self, granted: &str, required: &str) -> Result<bool>;

    /// Whether any held name satisfies `required`.
    ///
    /// Only a malformed `required` is an error. Held names the strategy
    /// cannot interpret never match.
    fn any_implies(&self, granted: &[&str], required: &str) -> Result<bool>;
}

/// Plain equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatcher;

impl PermissionMatcher for ExactMatcher {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn requires_stored_permission(&self) -> bool {
        true
    }

    fn implies(&self, granted: &str, required: &str) -> Result<bool> {
        Ok(granted == required)
    }

    fn any_implies(&self, granted: &[&str], required: &str) -> Result<bool> {
        Ok(granted.iter().any(|name| *name == required))
    }
}

/// Hierarchical wildcard matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct WildcardMatcher;

impl PermissionMatcher for WildcardMatcher {
    fn name(&self) -> &'static str {
        "wildcard"
    }

    fn requires_stored_permission(&self) -> bool {
        false
    }

    fn implies(&self, granted: &str, required: &str) -> Result<bool> {
        let granted = WildcardPermission::parse(granted)?;
        let required = WildcardPermission::parse(required)?;
        Ok(granted.implies(&required))
    }

    fn any_implies(&self, granted: &[&str], required: &str) -> Result<bool> {
        let required = WildcardPermission::parse(required)?;
        Ok(granted.iter().any(|name| match WildcardPermission::parse(name) {
            Ok(held) => held.implies(&required),
            Err(_) => {
                debug!(permission = %name, "Skipping malformed held permission");
                false
            }
        }))
    }
}

/// Pick the strategy the configuration asks for.
pub fn matcher_for(config: &PermissionConfig) -> Arc<dyn PermissionMatcher> {
    if config.enable_wildcard_permission {
        Arc::new(WildcardMatcher)
    } else {
        Arc::new(ExactMatcher)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Wildcard permission
// ═══════════════════════════════════════════════════════════════════════════════

/// A parsed wildcard permission string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardPermission {
    raw: String,
    parts: Vec<BTreeSet<String>>,
}

impl WildcardPermission {
    /// Parse `"posts.edit,delete.*"` into its parts.
    pub fn parse(permission: &str) -> Result<Self> {
        let raw = permission.trim();
        if raw.is_empty() {
            return Err(WarrantError::MalformedWildcard(permission.to_string()));
        }

        let mut parts = Vec::new();
        for part in raw.split(PART_DELIMITER) {
            let subparts: BTreeSet<String> = part
                .split(SUBPART_DELIMITER)
                .map(|s| s.trim().to_string())
                .collect();
            if subparts.iter().any(String::is_empty) {
                return Err(WarrantError::MalformedWildcard(permission.to_string()));
            }
            parts.push(subparts);
        }

        Ok(Self {
            raw: raw.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether holding `self` grants `other`.
    pub fn implies(&self, other: &WildcardPermission) -> bool {
        for (i, other_part) in other.parts.iter().enumerate() {
            let Some(part) = self.parts.get(i) else {
                // A shorter grant covers everything beneath it.
                return true;
            };

            if part.contains(WILDCARD_TOKEN) {
                continue;
            }

            if !other_part.is_subset(part) {
                return false;
            }
        }

        // Extra granted parts only match if they are wildcards.
        self.parts
            .iter()
            .skip(other.parts.len())
            .all(|part| part.contains(WILDCARD_TOKEN))
    }
}

impl fmt::Display for WildcardPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
