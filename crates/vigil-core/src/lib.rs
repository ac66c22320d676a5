//! # vigil-core
//!
//! Core data model for the vigil monitoring backend.
//!
//! This crate defines the wire-level resource types exchanged between
//! agents, the backend daemon, and the HTTP API: entities, checks,
//! events, metrics payloads, and the RBAC resources (roles, bindings,
//! claims). Types carry both a JSON encoding (`serde`) and a protobuf
//! encoding (`prost`) so the session layer can select either from a
//! single definition.
//!
//! ## Modules
//!
//! - [`meta`]: Object metadata and name validation
//! - [`namespace`]: Namespace resource
//! - [`entity`]: Monitored entities and entity subscriptions
//! - [`check`]: Check configuration, check requests, assets and hooks
//! - [`event`]: Events and event validation
//! - [`metrics`]: Metric points carried by events
//! - [`rbac`]: RBAC resources and rule matching

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod check;
pub mod entity;
pub mod event;
pub mod meta;
pub mod metrics;
pub mod namespace;
pub mod rbac;

pub use check::{Asset, Check, CheckRequest, HookConfig};
pub use entity::{Entity, System, add_entity_subscription, entity_subscription};
pub use event::Event;
pub use meta::{ObjectMeta, ValidationError};
pub use metrics::{MetricPoint, MetricTag, Metrics};
pub use namespace::Namespace;
pub use rbac::{
    Claims, ClusterRole, ClusterRoleBinding, Role, RoleBinding, RoleRef, Rule, Subject,
};
