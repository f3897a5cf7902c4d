pub mod admin;
pub mod health;
pub mod metrics;
pub mod response;
pub mod status_webhook;
pub mod vendor;

// Re-export commonly used types
pub use response::ApiResponse;
