//! SAML 2.0 value types.
//!
//! Identifiers, status, assertions, endpoints and attributes shared by
//! the protocol messages and the metadata model.

mod assertion;
mod attributes;
mod constants;
mod endpoint;
mod name_id;
mod status;

pub use assertion::*;
pub use attributes::*;
pub use constants::*;
pub use endpoint::*;
pub use name_id::*;
pub use status::*;
