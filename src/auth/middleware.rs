use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use tracing::{debug, warn};

use crate::AppState;
use crate::auth::{Claims, Role};
use crate::constants::{auth, headers};
use crate::error::{ApiError, ErrorCode, Result};
use crate::middleware::metrics::track_auth_failure;
use crate::services::settings_service::SettingsService;
use crate::utils::crypto::constant_time_eq;

/// Nonce action for one vendor, so a token only authenticates its owner
pub fn vendor_nonce_action(vendor_id: i64) -> String {
    format!("{}_{}", auth::VENDOR_NONCE_ACTION, vendor_id)
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix(auth::BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn session_claims(parts: &Parts, state: &AppState) -> Result<Claims> {
    let token = bearer_token(parts).ok_or_else(|| {
        track_auth_failure("token_missing");
        ApiError::with_code(ErrorCode::TokenMissing, ErrorCode::TokenMissing.message())
    })?;

    state.jwt_service.decode_token(token).map_err(|e| {
        debug!("Session token rejected: {}", e);
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                track_auth_failure("token_expired");
                ApiError::with_code(ErrorCode::TokenExpired, ErrorCode::TokenExpired.message())
            }
            _ => {
                track_auth_failure("token_invalid");
                ApiError::with_code(ErrorCode::TokenInvalid, ErrorCode::TokenInvalid.message())
            }
        }
    })
}

/// Vendor with a valid host session. Does not check the CSRF nonce; only the
/// nonce issuing endpoint should use this directly.
#[derive(Debug, Clone)]
pub struct SessionVendor {
    pub vendor_id: i64,
    pub claims: Claims,
}

impl FromRequestParts<AppState> for SessionVendor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let claims = session_claims(parts, state)?;

        let vendor_required = || {
            track_auth_failure("vendor_required");
            ApiError::with_code(ErrorCode::VendorRequired, ErrorCode::VendorRequired.message())
        };

        if !claims.has_role(Role::Vendor) {
            return Err(vendor_required());
        }
        let vendor_id = claims.account_id().ok_or_else(vendor_required)?;

        if !state.vendors.is_vendor(vendor_id).await? {
            warn!(vendor_id, "Session for an account that is not an active vendor");
            return Err(vendor_required());
        }

        Ok(SessionVendor { vendor_id, claims })
    }
}

/// Vendor with a valid host session and a valid `X-WWEA-Nonce`
#[derive(Debug, Clone)]
pub struct AuthenticatedVendor(pub SessionVendor);

impl AuthenticatedVendor {
    pub fn vendor_id(&self) -> i64 {
        self.0.vendor_id
    }
}

impl FromRequestParts<AppState> for AuthenticatedVendor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let vendor = SessionVendor::from_request_parts(parts, state).await?;

        let nonce = parts
            .headers
            .get(headers::NONCE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        if nonce.is_empty()
            || !state
                .secrets
                .validate_token(nonce, &vendor_nonce_action(vendor.vendor_id))
                .await
        {
            track_auth_failure("nonce_invalid");
            warn!(vendor_id = vendor.vendor_id, "Vendor request with missing or invalid nonce");
            return Err(ApiError::with_code(
                ErrorCode::NonceInvalid,
                ErrorCode::NonceInvalid.message(),
            ));
        }

        Ok(AuthenticatedVendor(vendor))
    }
}

/// Host session with the admin role
#[derive(Debug, Clone)]
pub struct AdminUser(pub Claims);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let claims = session_claims(parts, state)?;
        if !claims.has_role(Role::Admin) {
            track_auth_failure("admin_required");
            return Err(ApiError::with_code(
                ErrorCode::InsufficientPermissions,
                "Admin access required",
            ));
        }
        Ok(AdminUser(claims))
    }
}

/// Check `X-WWEA-SECRET` against the configured shared secret.
/// An unconfigured secret rejects every request.
pub async fn require_shared_secret(settings: &SettingsService, request_headers: &HeaderMap) -> Result<()> {
    let provided = request_headers
        .get(headers::SHARED_SECRET)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let Some(expected) = settings.shared_secret().await else {
        track_auth_failure("shared_secret_unconfigured");
        warn!("Inbound webhook rejected: shared secret is not configured");
        return Err(ApiError::with_code(
            ErrorCode::InvalidSharedSecret,
            ErrorCode::InvalidSharedSecret.message(),
        ));
    };

    if provided.is_empty() || !constant_time_eq(provided, &expected) {
        track_auth_failure("shared_secret_mismatch");
        warn!("Inbound webhook rejected: invalid shared secret");
        return Err(ApiError::with_code(
            ErrorCode::InvalidSharedSecret,
            ErrorCode::InvalidSharedSecret.message(),
        ));
    }

    Ok(())
}
