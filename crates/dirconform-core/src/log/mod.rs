//! Log and report hygiene.
//!
//! Diagnostics, probe command lines and failure messages can carry
//! credentials. Everything that leaves the engine as text passes through
//! [`SecretRedactor`] first.

mod redact;

pub use redact::{SecretRedactor, redact};
