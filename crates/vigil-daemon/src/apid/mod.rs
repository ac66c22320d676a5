//! HTTP API glue.
//!
//! The routers and handlers of the API live with the external API
//! surface; this module carries the request-path authorization chain
//! they mount: namespace extraction, attribute derivation from the URL
//! shape, and the authorization middleware itself.

pub mod middlewares;

pub use middlewares::{apply_authorization, NamespaceParam};
