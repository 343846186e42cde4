//! Profile registry use cases.
//!
//! Resolution, CRUD, import/export and sanitization of encounter profiles.

mod profile_ops;
mod sanitize;

pub use profile_ops::{ProfileError, ProfileOps};
pub use sanitize::{
    contains_forbidden, sanitize_profile, sanitize_text, validate_profile, ProfileValidation,
    MAX_FIELD_LENGTH,
};
