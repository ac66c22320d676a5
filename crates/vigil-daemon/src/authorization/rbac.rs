//! RBAC policy resolution.
//!
//! Evaluation order: every `ClusterRoleBinding` first, then the
//! `RoleBinding`s of the request namespace. A binding contributes only
//! when its subjects intersect the requesting user and groups; its role
//! reference is then resolved (cluster bindings name cluster roles
//! only; role bindings name a cluster role or a role in their own
//! namespace) and the resolved rules are matched. The first allowing
//! rule wins. There are no deny rules: a request no rule allows is
//! denied.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vigil_core::rbac::{
    ROLE_TYPE_CLUSTER_ROLE, ROLE_TYPE_ROLE, SUBJECT_TYPE_GROUP, SUBJECT_TYPE_USER, WILDCARD,
};
use vigil_core::{Claims, RoleRef, Rule, Subject};

use super::{Attributes, Authorizer, AuthzResult};
use crate::store::RbacStore;

/// Placeholder in a rule's resource names that expands to the
/// requesting user's subject, enabling self-scoped rules.
pub const SELF_USER_PLACEHOLDER: &str = "${username}";

/// RBAC [`Authorizer`] over a store of roles and bindings.
pub struct RbacAuthorizer {
    store: Arc<dyn RbacStore>,
}

impl RbacAuthorizer {
    /// Creates an authorizer reading policy from the given store.
    #[must_use]
    pub fn new(store: Arc<dyn RbacStore>) -> Self {
        Self { store }
    }

    /// Resolves a cluster role binding's role reference to its rules.
    /// `None` when the reference is invalid or the role is missing.
    async fn resolve_cluster_role_ref(&self, role_ref: &RoleRef) -> AuthzResult<Option<Vec<Rule>>> {
        if role_ref.role_type != ROLE_TYPE_CLUSTER_ROLE {
            debug!(
                role_type = %role_ref.role_type,
                name = %role_ref.name,
                "cluster role binding references a non-cluster role"
            );
            return Ok(None);
        }
        let role = self.store.get_cluster_role(&role_ref.name).await?;
        if role.is_none() {
            debug!(name = %role_ref.name, "bound cluster role not found");
        }
        Ok(role.map(|r| r.rules))
    }

    /// Resolves a role binding's role reference to its rules: a cluster
    /// role, or a role in the binding's own namespace. `None` when the
    /// reference is invalid or the role is missing.
    async fn resolve_role_ref(
        &self,
        role_ref: &RoleRef,
        namespace: &str,
    ) -> AuthzResult<Option<Vec<Rule>>> {
        match role_ref.role_type.as_str() {
            ROLE_TYPE_CLUSTER_ROLE => {
                let role = self.store.get_cluster_role(&role_ref.name).await?;
                if role.is_none() {
                    debug!(name = %role_ref.name, "bound cluster role not found");
                }
                Ok(role.map(|r| r.rules))
            }
            ROLE_TYPE_ROLE => {
                let role = self.store.get_role(namespace, &role_ref.name).await?;
                if role.is_none() {
                    debug!(namespace, name = %role_ref.name, "bound role not found");
                }
                Ok(role.map(|r| r.rules))
            }
            other => {
                debug!(role_type = %other, name = %role_ref.name, "unknown role reference type");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Authorizer for RbacAuthorizer {
    async fn authorize(&self, attrs: &Attributes) -> AuthzResult<bool> {
        for binding in self.store.list_cluster_role_bindings().await? {
            if !matches_subjects(&binding.subjects, &attrs.user) {
                continue;
            }
            let Some(rules) = self.resolve_cluster_role_ref(&binding.role_ref).await? else {
                continue;
            };
            if rules_allow(&rules, attrs) {
                debug!(
                    binding = %binding.metadata.name,
                    user = %attrs.user.subject,
                    "request allowed by cluster role binding"
                );
                return Ok(true);
            }
        }

        if !attrs.namespace.is_empty() {
            for binding in self.store.list_role_bindings(&attrs.namespace).await? {
                if !matches_subjects(&binding.subjects, &attrs.user) {
                    continue;
                }
                let Some(rules) = self
                    .resolve_role_ref(&binding.role_ref, &binding.metadata.namespace)
                    .await?
                else {
                    continue;
                };
                if rules_allow(&rules, attrs) {
                    debug!(
                        binding = %binding.metadata.name,
                        namespace = %binding.metadata.namespace,
                        user = %attrs.user.subject,
                        "request allowed by role binding"
                    );
                    return Ok(true);
                }
            }
        }

        debug!(
            user = %attrs.user.subject,
            verb = %attrs.verb,
            resource = %attrs.resource,
            resource_name = %attrs.resource_name,
            namespace = %attrs.namespace,
            "request denied: no binding allows it"
        );
        Ok(false)
    }
}

/// True when any subject of a binding names the user or one of their
/// groups.
fn matches_subjects(subjects: &[Subject], claims: &Claims) -> bool {
    subjects.iter().any(|subject| {
        match subject.subject_type.as_str() {
            SUBJECT_TYPE_USER => subject.name == claims.subject,
            SUBJECT_TYPE_GROUP => claims.groups.iter().any(|g| *g == subject.name),
            _ => false,
        }
    })
}

/// True when any rule allows the attributes.
fn rules_allow(rules: &[Rule], attrs: &Attributes) -> bool {
    rules.iter().any(|rule| rule_allows(rule, attrs))
}

/// A rule allows iff its verbs, resources, resource names, and API
/// groups all cover the request.
fn rule_allows(rule: &Rule, attrs: &Attributes) -> bool {
    rule.verb_matches(&attrs.verb)
        && rule.resource_matches(&attrs.resource)
        && resource_name_allows(rule, attrs)
        && rule.api_group_matches(&attrs.api_group)
}

/// Empty resource names cover every name, including the empty name of
/// list requests. A non-empty list covers exactly its entries, with
/// [`WILDCARD`] covering anything and [`SELF_USER_PLACEHOLDER`]
/// expanding to the requesting subject.
fn resource_name_allows(rule: &Rule, attrs: &Attributes) -> bool {
    if rule.resource_names.is_empty() {
        return true;
    }
    rule.resource_names.iter().any(|name| {
        if name == WILDCARD {
            return true;
        }
        let name = if name == SELF_USER_PLACEHOLDER {
            attrs.user.subject.as_str()
        } else {
            name.as_str()
        };
        name == attrs.resource_name
    })
}
