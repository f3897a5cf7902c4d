//! Application constants.
//!
//! Header names, token actions and event names that more than one module
//! refers to live here.

/// HTTP header names
pub mod headers {
    /// Shared secret sent by n8n on inbound status webhooks
    pub const SHARED_SECRET: &str = "X-WWEA-SECRET";

    /// Per-session CSRF token on vendor API calls
    pub const NONCE: &str = "X-WWEA-Nonce";
}

/// Host session and CSRF token settings
pub mod auth {
    /// Action prefix of the vendor REST nonce; the vendor id is appended
    pub const VENDOR_NONCE_ACTION: &str = "wwea_vendor_rest";

    /// Bearer prefix in the Authorization header
    pub const BEARER_PREFIX: &str = "Bearer ";
}

/// Outbound event types understood by the n8n workflows
pub mod n8n_events {
    pub const QR_GENERATION: &str = "qr_generation";
    pub const SESSION_STATUS: &str = "session_status";
    pub const MESSAGE_SEND: &str = "message_send";
    pub const GET_QR_CODE: &str = "get_qr_code";
    pub const GET_STATUS: &str = "get_status";
}

/// Server timeouts
pub mod timeouts {
    /// Whole-request timeout applied by the router
    pub const REQUEST_TIMEOUT_SECS: u64 = 60;
}
