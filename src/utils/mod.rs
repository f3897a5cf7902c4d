// Utility functions
// Encryption, key derivation, phone validation

pub mod crypto;
pub mod keys;
pub mod phone;

pub use keys::{dispatch_cache_key, sanitize_key, slugify};
pub use phone::{is_valid_phone, sanitize_phone};
