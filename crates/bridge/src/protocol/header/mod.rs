//! Header collection, validation and materialization.
//!
//! # Components
//!
//! - [`HeaderStore`]: case-insensitive ordered multimap owned by outgoing messages
//! - [`Materialized`]: the lowercase map and raw pair forms handed to users
//! - [`HeaderInit`]: single normalization boundary for heterogeneous header input
//! - [`validate_header_name`] / [`validate_header_value`]: token and field-vchar checks

mod init;
mod store;
mod validate;

pub use init::HeaderInit;
pub use store::{FieldValue, HeaderStore, IntoFieldValue, Materialized, SET_COOKIE};
pub use validate::{has_invalid_header_char, is_token, validate_header_name, validate_header_value};
