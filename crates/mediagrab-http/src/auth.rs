//! Bearer-token auth: issuance, verification, revocation.
//!
//! Tokens are signed JWTs; the key record in the coordination store is
//! the revocation authority. Deleting the record invalidates the token
//! regardless of its expiry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use mediagrab_coordination::{CoordinationStore, keys};
use mediagrab_types::ServiceError;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    jti: String,
    iat: i64,
    exp: i64,
}

/// Stored record for an issued key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key_id: String,
    pub subject: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Verified identity attached to a request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub key_id: String,
    pub subject: String,
}

pub struct JwtAuth {
    config: AuthConfig,
    algorithm: Algorithm,
    store: Arc<dyn CoordinationStore>,
}

impl JwtAuth {
    pub fn new(config: AuthConfig, store: Arc<dyn CoordinationStore>) -> Self {
        let algorithm = match config.algorithm.as_str() {
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            _ => Algorithm::HS256,
        };
        Self {
            config,
            algorithm,
            store,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Issue a bearer token, gated by the configured issue password.
    pub async fn issue_key(
        &self,
        password: &str,
        subject: &str,
        description: &str,
    ) -> Result<(String, ApiKeyRecord, DateTime<Utc>), ServiceError> {
        let Some(ref issue_password) = self.config.issue_password else {
            return Err(ServiceError::auth(
                "KEY_ISSUANCE_DISABLED",
                "key issuance is not configured",
            ));
        };
        if password != issue_password {
            warn!("API key issuance rejected: wrong password");
            return Err(ServiceError::auth(
                "INVALID_PASSWORD",
                "issue password does not match",
            ));
        }

        let key_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = now + Duration::days(self.config.expiration_days);

        let claims = Claims {
            sub: subject.to_string(),
            jti: key_id.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(
            &Header::new(self.algorithm),
            &claims,
            &EncodingKey::from_secret(self.config.secret.as_bytes()),
        )
        .map_err(|e| ServiceError::internal(format!("token signing failed: {e}")))?;

        let record = ApiKeyRecord {
            key_id: key_id.clone(),
            subject: subject.to_string(),
            description: description.to_string(),
            created_at: now,
            last_used_at: None,
            active: true,
        };
        self.store_record(&record, expires_at).await?;

        info!(key_id = %key_id, subject = %subject, "API key issued");
        Ok((token, record, expires_at))
    }

    /// Verify a bearer token and mark the key used.
    pub async fn verify(&self, token: &str) -> Result<AuthContext, ServiceError> {
        let validation = Validation::new(self.algorithm);
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                ServiceError::auth("TOKEN_EXPIRED", "bearer token has expired")
            }
            _ => ServiceError::auth("TOKEN_INVALID", "bearer token is invalid"),
        })?;

        let key_id = data.claims.jti;
        let raw = self
            .store
            .blob_get(&keys::api_key(&key_id))
            .await
            .map_err(|e| ServiceError::external(e.to_string()))?
            .ok_or_else(|| {
                warn!(key_id = %key_id, "bearer token for revoked or unknown key");
                ServiceError::auth("TOKEN_REVOKED", "API key not found or revoked")
            })?;

        let mut record: ApiKeyRecord = serde_json::from_str(&raw)
            .map_err(|e| ServiceError::internal(format!("corrupt key record: {e}")))?;
        if !record.active {
            return Err(ServiceError::auth("TOKEN_REVOKED", "API key is inactive"));
        }

        record.last_used_at = Some(Utc::now());
        let expires_at = DateTime::from_timestamp(data.claims.exp, 0).unwrap_or_else(Utc::now);
        // Bookkeeping only; a failed write must not fail the request.
        if let Err(err) = self.store_record(&record, expires_at).await {
            warn!(key_id = %record.key_id, "failed to record key usage: {err}");
        }

        Ok(AuthContext {
            key_id: record.key_id,
            subject: record.subject,
        })
    }

    /// Revoke a key by deleting its record.
    pub async fn revoke_key(&self, password: &str, key_id: &str) -> Result<bool, ServiceError> {
        let Some(ref issue_password) = self.config.issue_password else {
            return Err(ServiceError::auth(
                "KEY_ISSUANCE_DISABLED",
                "key issuance is not configured",
            ));
        };
        if password != issue_password {
            return Err(ServiceError::auth(
                "INVALID_PASSWORD",
                "issue password does not match",
            ));
        }

        let key = keys::api_key(key_id);
        let existed = self
            .store
            .blob_get(&key)
            .await
            .map_err(|e| ServiceError::external(e.to_string()))?
            .is_some();
        self.store
            .blob_delete(&key)
            .await
            .map_err(|e| ServiceError::external(e.to_string()))?;

        if existed {
            info!(key_id = %key_id, "API key revoked");
        }
        Ok(existed)
    }

    /// Issued key ids currently stored.
    pub async fn list_keys(&self) -> Result<Vec<String>, ServiceError> {
        let keys = self
            .store
            .scan_prefix(keys::API_KEY_PREFIX)
            .await
            .map_err(|e| ServiceError::external(e.to_string()))?;
        Ok(keys
            .into_iter()
            .map(|k| k.trim_start_matches(keys::API_KEY_PREFIX).to_string())
            .collect())
    }

    async fn store_record(
        &self,
        record: &ApiKeyRecord,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let raw = serde_json::to_string(record)
            .map_err(|e| ServiceError::internal(e.to_string()))?;
        // Records outlive their token by a day so expired-token probes
        // still resolve to a clean TOKEN_EXPIRED.
        let ttl = (expires_at - Utc::now()).num_seconds().max(0) as u64 + 24 * 3600;
        self.store
            .blob_set(&keys::api_key(&record.key_id), &raw, ttl)
            .await
            .map_err(|e| ServiceError::external(e.to_string()))
    }
}
