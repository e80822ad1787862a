//! Access policy: which scopes may call which method on which resource group.
//!
//! # Design
//!
//! The policy is a static table of `(group, method, allowed roles)` rows
//! consulted by a single lookup. Anything not listed is denied: an unknown
//! path, an unlisted method (`PATCH`, `HEAD`, `OPTIONS`), or a scope string
//! that is not one of the known roles.
//!
//! | Group | Method | Allowed |
//! |-------|--------|---------|
//! | catalog | `GET` | READER, SYSTEM |
//! | catalog | `POST`, `PUT`, `DELETE` | SYSTEM |
//! | realtime, hourly, daily, full | `GET` | READER, UPDATER, SYSTEM |
//! | realtime, hourly, daily, full | `PUT` | UPDATER, SYSTEM |

use std::fmt;

use axum::http::Method;
use serde::Serialize;

use super::{Role, verifier::AuthorityGrant};

/// A family of weather API endpoints sharing one path prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceGroup {
    /// `/v1/locations`
    Catalog,
    /// `/v1/realtime`
    Realtime,
    /// `/v1/hourly`
    Hourly,
    /// `/v1/daily`
    Daily,
    /// `/v1/full`
    Full,
}

impl ResourceGroup {
    /// Every group.
    pub const ALL: [Self; 5] = [
        Self::Catalog,
        Self::Realtime,
        Self::Hourly,
        Self::Daily,
        Self::Full,
    ];

    /// Path prefix owned by this group.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Catalog => "/v1/locations",
            Self::Realtime => "/v1/realtime",
            Self::Hourly => "/v1/hourly",
            Self::Daily => "/v1/daily",
            Self::Full => "/v1/full",
        }
    }

    /// Group owning `path`: the prefix itself or the prefix followed by `/`.
    ///
    /// Paths with empty, `.` or `..` segments (plain or percent-encoded) own no
    /// group, since an upstream URL parser would resolve them elsewhere.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        if !is_canonical(path) {
            return None;
        }
        Self::ALL.into_iter().find(|group| {
            path.strip_prefix(group.prefix())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }
}

/// Absolute path whose segments are all non-empty (one trailing `/` aside)
/// and none is a dot segment.
fn is_canonical(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    rest.split('/').all(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        !decoded.is_empty() && decoded != "." && decoded != ".." && !segment.contains('\\')
    })
}

impl fmt::Display for ResourceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Catalog => "catalog",
            Self::Realtime => "realtime",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Full => "full",
        })
    }
}

/// One row of the policy table.
#[derive(Debug, Clone)]
pub struct PolicyRule {
    /// Resource group
    pub group: ResourceGroup,
    /// HTTP method
    pub method: Method,
    /// Roles allowed to make this call
    pub allowed: &'static [Role],
}

/// Outcome of a policy lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The grant holds one of the allowed scopes.
    Allow,
    /// No rule for this call, or none of the grant's scopes is allowed.
    Deny,
}

impl Decision {
    /// `true` for [`Decision::Allow`].
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

const READ_ANY: &[Role] = &[Role::Reader, Role::Updater, Role::System];
const WRITE_WEATHER: &[Role] = &[Role::Updater, Role::System];
const READ_CATALOG: &[Role] = &[Role::Reader, Role::System];
const SYSTEM_ONLY: &[Role] = &[Role::System];

macro_rules! rule {
    ($group:ident, $method:ident, $allowed:expr) => {
        PolicyRule {
            group: ResourceGroup::$group,
            method: Method::$method,
            allowed: $allowed,
        }
    };
}

static RULES: [PolicyRule; 12] = [
    rule!(Catalog, GET, READ_CATALOG),
    rule!(Catalog, POST, SYSTEM_ONLY),
    rule!(Catalog, PUT, SYSTEM_ONLY),
    rule!(Catalog, DELETE, SYSTEM_ONLY),
    rule!(Realtime, GET, READ_ANY),
    rule!(Realtime, PUT, WRITE_WEATHER),
    rule!(Hourly, GET, READ_ANY),
    rule!(Hourly, PUT, WRITE_WEATHER),
    rule!(Daily, GET, READ_ANY),
    rule!(Daily, PUT, WRITE_WEATHER),
    rule!(Full, GET, READ_ANY),
    rule!(Full, PUT, WRITE_WEATHER),
];

/// Handle to the static policy table.
#[derive(Debug, Clone, Copy)]
pub struct PolicyTable {
    rules: &'static [PolicyRule],
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl PolicyTable {
    /// The weather API policy.
    #[must_use]
    pub fn standard() -> Self {
        Self { rules: &RULES }
    }

    /// Every rule, in table order.
    #[must_use]
    pub const fn rules(&self) -> &'static [PolicyRule] {
        self.rules
    }

    /// Roles allowed for `(group, method)`, or `None` when no rule exists.
    #[must_use]
    pub fn allowed(&self, group: ResourceGroup, method: &Method) -> Option<&'static [Role]> {
        self.rules
            .iter()
            .find(|rule| rule.group == group && rule.method == *method)
            .map(|rule| rule.allowed)
    }

    /// Allow iff the grant holds at least one scope listed for `(group, method)`.
    #[must_use]
    pub fn decide(&self, group: ResourceGroup, method: &Method, grant: &AuthorityGrant) -> Decision {
        let Some(allowed) = self.allowed(group, method) else {
            return Decision::Deny;
        };
        if allowed.iter().any(|role| grant.has_scope(role.as_str())) {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }

    /// Resolve the group from `path` and decide. Paths outside every group are denied.
    #[must_use]
    pub fn decide_path(&self, path: &str, method: &Method, grant: &AuthorityGrant) -> Decision {
        ResourceGroup::from_path(path)
            .map_or(Decision::Deny, |group| self.decide(group, method, grant))
    }
}
