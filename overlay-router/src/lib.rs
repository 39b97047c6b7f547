//! A GraphQL proxy that overlays locally defined schema extensions onto a remote schema.
//!
//! Client queries are validated against the merged schema, stripped of every
//! extension-only selection, and forwarded to the remote server. The remote
//! data is handed back as the root value for local resolution of the
//! extension fields.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![warn(unreachable_pub)]

pub mod json_ext;

mod cache;
pub mod configuration;
pub mod error;
mod executable;
pub mod graphql;
pub mod index;
pub mod introspection;
pub mod proxy;
pub mod query;
pub mod schema;
pub mod upstream;

pub use configuration::Configuration;
pub use executable::main;
pub use index::ExtensionFieldIndex;
pub use introspection::OriginSchema;
pub use proxy::Proxy;
pub use proxy::ProxyResponse;
pub use query::rewrite;
pub use schema::Bootstrap;
pub use schema::FieldOrigin;
pub use schema::OverlayOptions;
pub use schema::OverlaySchema;
pub use schema::overlay;
