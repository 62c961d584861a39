//! Safety helpers shared across the core.
//!
//! Currently limited to secret redaction; adapters route every backend
//! error message through [`redact::redact_secrets`] before it is stored
//! on a vote or logged.

pub mod redact;

pub use redact::{mask_secret, redact_secrets, Redacted};
