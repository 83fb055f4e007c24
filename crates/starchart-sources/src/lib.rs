//! Types and pure helpers for dealing with the upstream image listing.
//!
//! Includes the normalized [`ImageDescriptor`] data model, the defensive
//! wire schema for the upstream listing API, and the mirror-host proxy
//! URL resolver.

#![warn(missing_docs)]

mod descriptor;
mod listing;
mod proxy;

pub use descriptor::*;
pub use listing::*;
pub use proxy::*;
