//! Multi-form role/permission input.
//!
//! Every capability method accepts a [`Selector`]: a name, a numeric id, an
//! already resolved model, a (possibly nested) list of those, or a
//! pre-filtered collection of models. Conversions exist for the common shapes
//! so call sites can pass `"posts.edit"`, `7u64`, `&role`, `["a", "b"]` and so on.

use super::models::{Permission, PermissionId, Role, RoleId};
use crate::error::Lookup;

/// A role or permission reference, in any accepted shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector<T> {
    /// Lookup by name. For roles a name may be a pipe-delimited list.
    Name(String),
    /// Lookup by numeric id.
    Id(u64),
    /// Already resolved model, passed through.
    Model(T),
    /// Several selectors; nesting is allowed and flattened on use.
    List(Vec<Selector<T>>),
    /// A pre-filtered set of models.
    Collection(Vec<T>),
}

impl<T> Selector<T> {
    /// Flatten nested lists and collections into single-item selectors,
    /// preserving order.
    pub fn flatten(self) -> Vec<Selector<T>> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(self, out: &mut Vec<Selector<T>>) {
        match self {
            Self::List(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
            Self::Collection(models) => out.extend(models.into_iter().map(Self::Model)),
            single => out.push(single),
        }
    }

    /// Empty names and empty lists carry nothing to resolve.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Name(name) => name.is_empty(),
            Self::List(items) => items.iter().all(Selector::is_empty),
            Self::Collection(models) => models.is_empty(),
            Self::Id(_) | Self::Model(_) => false,
        }
    }
}

/// A single resolvable role/permission reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorItem<T> {
    Name(String),
    Id(u64),
    Model(T),
}

impl<T> Selector<T> {
    /// Flattened single items, in order.
    pub fn items(self) -> Vec<SelectorItem<T>> {
        self.flatten()
            .into_iter()
            .filter_map(|selector| match selector {
                Selector::Name(name) => Some(SelectorItem::Name(name)),
                Selector::Id(id) => Some(SelectorItem::Id(id)),
                Selector::Model(model) => Some(SelectorItem::Model(model)),
                Selector::List(_) | Selector::Collection(_) => None,
            })
            .collect()
    }
}

impl<T> SelectorItem<T> {
    /// The lookup key this item would be resolved by, if it is not a model.
    pub fn lookup(&self) -> Option<Lookup> {
        match self {
            Self::Name(name) => Some(Lookup::Name(name.clone())),
            Self::Id(id) => Some(Lookup::Id(*id)),
            Self::Model(_) => None,
        }
    }
}

impl<T> From<SelectorItem<T>> for Selector<T> {
    fn from(item: SelectorItem<T>) -> Self {
        match item {
            SelectorItem::Name(name) => Self::Name(name),
            SelectorItem::Id(id) => Self::Id(id),
            SelectorItem::Model(model) => Self::Model(model),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pipe-delimited strings
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of splitting a pipe-delimited role string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeSplit {
    /// Too short to be a list; used as a literal name.
    Single(String),
    Many(Vec<String>),
}

/// Split `"admin|editor"` (optionally wrapped in matching `'` or `"` quotes)
/// into its names.
///
/// Strings of two characters or fewer are returned unparsed. When the quoting
/// is absent or mismatched the whole string, quotes included, is split as-is.
pub fn convert_pipe_to_array(pipe_string: &str) -> PipeSplit {
    let pipe_string = pipe_string.trim();

    if pipe_string.chars().count() <= 2 {
        return PipeSplit::Single(pipe_string.to_string());
    }

    let first = pipe_string.chars().next();
    let last = pipe_string.chars().last();

    let body = match (first, last) {
        (Some(q), Some(end)) if q == end && (q == '\'' || q == '"') => pipe_string.trim_matches(q),
        _ => pipe_string,
    };

    PipeSplit::Many(body.split('|').map(str::to_string).collect())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl<T> From<&str> for Selector<T> {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl<T> From<String> for Selector<T> {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl<T> From<&String> for Selector<T> {
    fn from(name: &String) -> Self {
        Self::Name(name.clone())
    }
}

impl<T> From<u64> for Selector<T> {
    fn from(id: u64) -> Self {
        Self::Id(id)
    }
}

impl<T> From<Vec<&str>> for Selector<T> {
    fn from(names: Vec<&str>) -> Self {
        Self::List(names.into_iter().map(Selector::from).collect())
    }
}

impl<T> From<Vec<String>> for Selector<T> {
    fn from(names: Vec<String>) -> Self {
        Self::List(names.into_iter().map(Selector::Name).collect())
    }
}

impl<T> From<&[String]> for Selector<T> {
    fn from(names: &[String]) -> Self {
        Self::List(names.iter().map(Selector::from).collect())
    }
}

impl<T, const N: usize> From<[&str; N]> for Selector<T> {
    fn from(names: [&str; N]) -> Self {
        Self::List(names.into_iter().map(Selector::from).collect())
    }
}

impl<T> From<Vec<Selector<T>>> for Selector<T> {
    fn from(items: Vec<Selector<T>>) -> Self {
        Self::List(items)
    }
}

impl From<Permission> for Selector<Permission> {
    fn from(permission: Permission) -> Self {
        Self::Model(permission)
    }
}

impl From<&Permission> for Selector<Permission> {
    fn from(permission: &Permission) -> Self {
        Self::Model(permission.clone())
    }
}

impl From<PermissionId> for Selector<Permission> {
    fn from(id: PermissionId) -> Self {
        Self::Id(id.get())
    }
}

impl From<Vec<Permission>> for Selector<Permission> {
    fn from(permissions: Vec<Permission>) -> Self {
        Self::Collection(permissions)
    }
}

impl From<Role> for Selector<Role> {
    fn from(role: Role) -> Self {
        Self::Model(role)
    }
}

impl From<&Role> for Selector<Role> {
    fn from(role: &Role) -> Self {
        Self::Model(role.clone())
    }
}

impl From<RoleId> for Selector<Role> {
    fn from(id: RoleId) -> Self {
        Self::Id(id.get())
    }
}

impl From<Vec<Role>> for Selector<Role> {
    fn from(roles: Vec<Role>) -> Self {
        Self::Collection(roles)
    }
}

// Single items

impl<T> From<&str> for SelectorItem<T> {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl<T> From<String> for SelectorItem<T> {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl<T> From<&String> for SelectorItem<T> {
    fn from(name: &String) -> Self {
        Self::Name(name.clone())
    }
}

impl<T> From<u64> for SelectorItem<T> {
    fn from(id: u64) -> Self {
        Self::Id(id)
    }
}

impl From<Permission> for SelectorItem<Permission> {
    fn from(permission: Permission) -> Self {
        Self::Model(permission)
    }
}

impl From<&Permission> for SelectorItem<Permission> {
    fn from(permission: &Permission) -> Self {
        Self::Model(permission.clone())
    }
}

impl From<PermissionId> for SelectorItem<Permission> {
    fn from(id: PermissionId) -> Self {
        Self::Id(id.get())
    }
}

impl From<Role> for SelectorItem<Role> {
    fn from(role: Role) -> Self {
        Self::Model(role)
    }
}

impl From<&Role> for SelectorItem<Role> {
    fn from(role: &Role) -> Self {
        Self::Model(role.clone())
    }
}

impl From<RoleId> for SelectorItem<Role> {
    fn from(id: RoleId) -> Self {
        Self::Id(id.get())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
