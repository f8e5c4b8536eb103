//! Request identity.
//!
//! - `identity` - the `UserId` extractor backed by the gateway-installed
//!   `x-user-id` header

mod identity;

pub use identity::{UserId, USER_ID_HEADER};
