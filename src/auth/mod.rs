use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod middleware;

pub use middleware::{
    require_shared_secret, vendor_nonce_action, AdminUser, AuthenticatedVendor, SessionVendor,
};

/// Host session claims
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Claims {
    pub sub: String,  // Subject (account id)
    pub role: String, // vendor, admin
    pub exp: i64,     // Expiration time
    pub iat: i64,     // Issued at
    pub iss: String,  // Issuer
}

impl Claims {
    pub fn new(account_id: i64, role: Role, issuer: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: account_id.to_string(),
            role: role.as_str().to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            iss: issuer.to_string(),
        }
    }

    pub fn account_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }

    pub fn has_role(&self, required_role: Role) -> bool {
        Role::from_str(&self.role).is_ok_and(|role| role == required_role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Vendor,
    Admin,
}

impl Role {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "vendor" => Ok(Role::Vendor),
            "admin" | "administrator" => Ok(Role::Admin),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Vendor => "vendor",
            Role::Admin => "admin",
        }
    }
}

/// HS256 signer/verifier for host session tokens
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl JwtService {
    pub fn new(secret: &str, issuer: impl Into<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn encode_token(&self, claims: &Claims) -> anyhow::Result<String> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)?)
    }

    /// Issue a token for an account; used by tooling and tests
    pub fn generate_token(&self, account_id: i64, role: Role, ttl: Duration) -> anyhow::Result<String> {
        self.encode_token(&Claims::new(account_id, role, &self.issuer, ttl))
    }

    pub fn decode_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}
