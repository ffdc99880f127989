//! Credential Validator
//!
//! The verified path: signature and claims are checked by an
//! [`IdentityProvider`], then the subject record decides whether the caller
//! may proceed. The unverified identity from [`crate::identity`] is never
//! consulted here.

use crate::config::AuthConfig;
use crate::model::{SanctionTarget, SubjectId};
use crate::sanctions::SanctionManager;
use crate::store::StoreClient;
use crate::{GateResult, GatewayError};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashSet;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Identity asserted by a verified credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Subject id
    pub subject_id: SubjectId,
    /// Contact address, if the provider has one
    pub email: Option<String>,
}

/// Identity provider errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Signature, claims or account check failed
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Provider could not be reached
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidToken(reason) => GatewayError::Unauthenticated(reason),
            ProviderError::Unavailable(_) => GatewayError::TransientStore("identity provider unavailable".into()),
        }
    }
}

/// External identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Check signature and claims of `token`
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, ProviderError>;

    /// Remove the account so its tokens stop verifying
    async fn delete_account(&self, subject_id: &str) -> Result<(), ProviderError>;
}

/// Token claims
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject id (`sub`)
    pub sub: String,
    /// Contact address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Expiry, unix seconds
    pub exp: i64,
    /// Issued at, unix seconds
    pub iat: i64,
    /// Not before, unix seconds
    pub nbf: i64,
    /// Token id
    pub jti: String,
}

/// HS256 identity provider
pub struct JwtIdentityProvider {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    deleted: DashSet<SubjectId>,
}

impl JwtIdentityProvider {
    /// Provider signing and verifying with `config`
    pub fn new(config: AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
            deleted: DashSet::new(),
        }
    }

    /// Sign a token for `subject`, valid for `ttl`
    pub fn issue_token(&self, subject: &str, email: Option<&str>, ttl: Duration) -> GateResult<String> {
        // jsonwebtoken checks exp against wall time, so stamp with it too
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            email: email.map(str::to_string),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| GatewayError::Validation(format!("cannot sign token: {}", e)))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.jwt_issuer]);
        validation.set_audience(&[&self.config.jwt_audience]);
        validation.leeway = self.config.leeway_secs;
        validation
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, ProviderError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation())
            .map_err(|e| ProviderError::InvalidToken(e.to_string()))?;

        if self.deleted.contains(&data.claims.sub) {
            return Err(ProviderError::InvalidToken("account deleted".into()));
        }
        Ok(VerifiedIdentity {
            subject_id: data.claims.sub,
            email: data.claims.email,
        })
    }

    async fn delete_account(&self, subject_id: &str) -> Result<(), ProviderError> {
        self.deleted.insert(subject_id.to_string());
        Ok(())
    }
}

/// Access level a call requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Any registered, unbanned subject
    Member,
    /// Registered, unbanned admin
    Admin,
}

/// Caller that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Subject id
    pub subject_id: SubjectId,
    /// Admin at the time of the check
    pub is_admin: bool,
}

/// Credential validator
#[derive(Clone)]
pub struct CredentialValidator {
    provider: Arc<dyn IdentityProvider>,
    store: StoreClient,
    sanctions: SanctionManager,
}

impl CredentialValidator {
    /// Validator checking credentials with `provider` and sanctions with `sanctions`
    pub fn new(provider: Arc<dyn IdentityProvider>, store: StoreClient, sanctions: SanctionManager) -> Self {
        Self {
            provider,
            store,
            sanctions,
        }
    }

    /// Provider check only; the subject record may not exist yet
    pub async fn verify_identity(&self, credential: &str) -> GateResult<VerifiedIdentity> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(GatewayError::Unauthenticated("missing credential".into()));
        }
        self.provider.verify(credential).await.map_err(|e| {
            debug!(error = %e, "credential rejected");
            GatewayError::from(e)
        })
    }

    /// Full check: verified token, existing subject, no active ban, and the
    /// admin flag when `access` requires it.
    pub async fn verify(&self, credential: &str, access: Access) -> GateResult<Principal> {
        let identity = self.verify_identity(credential).await?;
        let subject = self
            .store
            .get_subject(&identity.subject_id)
            .await?
            .ok_or_else(|| GatewayError::Unauthorized("no account for this credential".into()))?
            .value;

        let target = SanctionTarget::Subject(subject.id.clone());
        if self.sanctions.is_sanctioned(&target).await? {
            warn!(subject_id = %subject.id, "sanctioned subject rejected");
            return Err(GatewayError::Unauthorized("account suspended".into()));
        }
        if access == Access::Admin && !subject.is_admin {
            warn!(subject_id = %subject.id, "admin call without admin flag");
            return Err(GatewayError::Unauthorized("admin access required".into()));
        }

        Ok(Principal {
            subject_id: subject.id,
            is_admin: subject.is_admin,
        })
    }
}
