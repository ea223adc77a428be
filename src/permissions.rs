//! Runtime permission policy for radio discovery.
//!
//! Scanning for peripherals requires a location-class permission whose exact
//! identity depends on both the running platform API level and the API level
//! the application targets. [`PermissionPolicy`] maps that pair to a
//! [`RequiredPermissionSet`]; [`MissingPermissionSet`] is the subset a given
//! platform has not granted yet.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::PermissionConfig;

/// A platform API level (monotonically increasing release number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiLevel(pub u32);

impl ApiLevel {
    /// First level exposing a single location master switch.
    pub const P: ApiLevel = ApiLevel(28);
    /// First level where discovery requires fine location.
    pub const Q: ApiLevel = ApiLevel(29);
}

impl fmt::Display for ApiLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A runtime permission the gate may need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Precise location.
    FineLocation,
    /// Approximate location.
    CoarseLocation,
}

impl Permission {
    /// Return all permission variants.
    pub fn all() -> &'static [Permission] {
        &[Permission::FineLocation, Permission::CoarseLocation]
    }

    /// Platform identifier for this permission.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::FineLocation => "fine_location",
            Permission::CoarseLocation => "coarse_location",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = PermissionParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fine_location" | "access_fine_location" => Ok(Permission::FineLocation),
            "coarse_location" | "access_coarse_location" => Ok(Permission::CoarseLocation),
            _ => Err(PermissionParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an unknown permission string.
#[derive(Debug, Clone)]
pub struct PermissionParseError(pub String);

impl fmt::Display for PermissionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown permission: {:?}", self.0)
    }
}

impl std::error::Error for PermissionParseError {}

/// Ordered, duplicate-free, non-empty set of permissions the gate requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredPermissionSet {
    permissions: Vec<Permission>,
}

impl RequiredPermissionSet {
    /// Build a set from `permissions`, keeping first-occurrence order.
    ///
    /// Returns `None` when `permissions` is empty.
    pub fn new(permissions: impl IntoIterator<Item = Permission>) -> Option<Self> {
        let mut ordered: Vec<Permission> = Vec::new();
        for permission in permissions {
            if !ordered.contains(&permission) {
                ordered.push(permission);
            }
        }
        (!ordered.is_empty()).then_some(Self {
            permissions: ordered,
        })
    }

    fn single(permission: Permission) -> Self {
        Self {
            permissions: vec![permission],
        }
    }

    pub fn as_slice(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    /// Always `false`; kept for API symmetry with [`MissingPermissionSet`].
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Compute the subset not satisfied by `is_granted`, in required order.
    pub fn missing<F>(&self, mut is_granted: F) -> MissingPermissionSet
    where
        F: FnMut(Permission) -> bool,
    {
        MissingPermissionSet {
            permissions: self
                .permissions
                .iter()
                .copied()
                .filter(|p| !is_granted(*p))
                .collect(),
        }
    }
}

/// Permissions from a [`RequiredPermissionSet`] that are not currently granted.
///
/// An empty set means the permission precondition holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingPermissionSet {
    permissions: Vec<Permission>,
}

impl MissingPermissionSet {
    pub fn as_slice(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.permissions.iter().copied()
    }
}

impl fmt::Display for MissingPermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.permissions.iter().map(|p| p.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Maps platform and target API levels to the permissions discovery needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionPolicy {
    modern_api_level: ApiLevel,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            modern_api_level: ApiLevel::Q,
        }
    }
}

impl PermissionPolicy {
    #[must_use]
    pub fn new(modern_api_level: ApiLevel) -> Self {
        Self { modern_api_level }
    }

    #[must_use]
    pub fn from_config(config: &PermissionConfig) -> Self {
        Self::new(ApiLevel(config.modern_api_level))
    }

    #[must_use]
    pub fn modern_api_level(&self) -> ApiLevel {
        self.modern_api_level
    }

    /// Fine location when both levels reach the modern threshold, coarse otherwise.
    #[must_use]
    pub fn required_permissions(
        &self,
        platform: ApiLevel,
        target: ApiLevel,
    ) -> RequiredPermissionSet {
        if platform >= self.modern_api_level && target >= self.modern_api_level {
            RequiredPermissionSet::single(Permission::FineLocation)
        } else {
            RequiredPermissionSet::single(Permission::CoarseLocation)
        }
    }
}
