//! RBAC resources: roles, bindings, and rule matching.
//!
//! Roles bundle rules; bindings grant a role to subjects. Cluster-scoped
//! variants (`ClusterRole`, `ClusterRoleBinding`) apply everywhere, the
//! namespaced variants (`Role`, `RoleBinding`) apply within their own
//! namespace. There are no deny rules: a request is allowed iff some
//! rule reachable through a matching binding allows it.

use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;

/// Wildcard accepted in verbs, resources, resource names and API groups.
pub const WILDCARD: &str = "*";

/// Subject type for an individual user.
pub const SUBJECT_TYPE_USER: &str = "User";

/// Subject type for a group of users.
pub const SUBJECT_TYPE_GROUP: &str = "Group";

/// Role reference type naming a namespaced [`Role`].
pub const ROLE_TYPE_ROLE: &str = "Role";

/// Role reference type naming a cluster-scoped [`ClusterRole`].
pub const ROLE_TYPE_CLUSTER_ROLE: &str = "ClusterRole";

/// Authenticated principal identity, produced by the upstream
/// authentication stage and consumed by the authorizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user) name.
    pub subject: String,

    /// Groups the subject belongs to.
    pub groups: Vec<String>,
}

impl Claims {
    /// Creates claims for a subject belonging to the given groups.
    #[must_use]
    pub fn new(subject: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            subject: subject.into(),
            groups,
        }
    }
}

/// A single permission: a set of verbs over a set of resources,
/// optionally restricted to specific resource names and API groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Permitted verbs (`get`, `list`, `create`, `update`, `delete`) or
    /// [`WILDCARD`].
    pub verbs: Vec<String>,

    /// Resource types the rule covers, or [`WILDCARD`].
    pub resources: Vec<String>,

    /// Specific resource names the rule is restricted to. Empty means
    /// all names.
    #[serde(default)]
    pub resource_names: Vec<String>,

    /// API groups the rule covers. Empty means all groups.
    #[serde(default)]
    pub api_groups: Vec<String>,
}

impl Rule {
    /// True when the rule's verbs cover `verb`.
    #[must_use]
    pub fn verb_matches(&self, verb: &str) -> bool {
        self.verbs.iter().any(|v| v == WILDCARD || v == verb)
    }

    /// True when the rule's resources cover `resource`.
    #[must_use]
    pub fn resource_matches(&self, resource: &str) -> bool {
        self.resources.iter().any(|r| r == WILDCARD || r == resource)
    }

    /// True when the rule's API groups cover `api_group`. An empty list
    /// covers every group.
    #[must_use]
    pub fn api_group_matches(&self, api_group: &str) -> bool {
        self.api_groups.is_empty()
            || self.api_groups.iter().any(|g| g == WILDCARD || g == api_group)
    }
}

/// A subject a binding grants its role to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// [`SUBJECT_TYPE_USER`] or [`SUBJECT_TYPE_GROUP`].
    #[serde(rename = "type")]
    pub subject_type: String,

    /// User or group name.
    pub name: String,
}

impl Subject {
    /// Creates a user subject.
    #[must_use]
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            subject_type: SUBJECT_TYPE_USER.to_string(),
            name: name.into(),
        }
    }

    /// Creates a group subject.
    #[must_use]
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            subject_type: SUBJECT_TYPE_GROUP.to_string(),
            name: name.into(),
        }
    }
}

/// Reference from a binding to the role it grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    /// [`ROLE_TYPE_ROLE`] or [`ROLE_TYPE_CLUSTER_ROLE`].
    #[serde(rename = "type")]
    pub role_type: String,

    /// Name of the referenced role.
    pub name: String,
}

impl RoleRef {
    /// References a namespaced role by name.
    #[must_use]
    pub fn role(name: impl Into<String>) -> Self {
        Self {
            role_type: ROLE_TYPE_ROLE.to_string(),
            name: name.into(),
        }
    }

    /// References a cluster role by name.
    #[must_use]
    pub fn cluster_role(name: impl Into<String>) -> Self {
        Self {
            role_type: ROLE_TYPE_CLUSTER_ROLE.to_string(),
            name: name.into(),
        }
    }
}

/// A namespaced bundle of rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role name and namespace.
    pub metadata: ObjectMeta,

    /// Permissions the role grants.
    pub rules: Vec<Rule>,
}

/// A cluster-scoped bundle of rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRole {
    /// Role name; the namespace is empty.
    pub metadata: ObjectMeta,

    /// Permissions the role grants.
    pub rules: Vec<Rule>,
}

/// Grants a role to subjects within the binding's namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    /// Binding name and namespace.
    pub metadata: ObjectMeta,

    /// The granted role: a [`Role`] in the binding's namespace or a
    /// [`ClusterRole`] applied within it.
    pub role_ref: RoleRef,

    /// Users and groups the role is granted to.
    pub subjects: Vec<Subject>,
}

/// Grants a cluster role to subjects across every namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRoleBinding {
    /// Binding name; the namespace is empty.
    pub metadata: ObjectMeta,

    /// The granted role; must reference a [`ClusterRole`].
    pub role_ref: RoleRef,

    /// Users and groups the role is granted to.
    pub subjects: Vec<Subject>,
}
