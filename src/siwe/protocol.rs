use std::fmt;
use std::sync::Arc;
#[cfg(feature = "metrics")]
use std::time::Instant;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{AuthError, VerifyError};
use super::message::{MessageParams, SiweMessage};
use super::verifier::{SignatureScheme, SignatureVerifier, Verdict, normalize_address};
use crate::nonce::{AuthConfig, ConsumeOutcome, Nonce, NonceStore};

#[cfg(feature = "metrics")]
use crate::nonce::MetricEvent;

/// Body of a verification request.
///
/// Every field is optional at the type level so that a missing field is
/// reported as [`AuthError::MissingParameters`] rather than a
/// deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationRequest {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl VerificationRequest {
    pub fn new(
        address: impl Into<String>,
        message: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            address: Some(address.into()),
            message: Some(message.into()),
            signature: Some(signature.into()),
        }
    }

    fn required_fields(&self) -> Result<(&str, &str, &str), AuthError> {
        fn present(field: &Option<String>) -> Option<&str> {
            field.as_deref().filter(|value| !value.trim().is_empty())
        }

        match (
            present(&self.address),
            present(&self.message),
            present(&self.signature),
        ) {
            (Some(address), Some(message), Some(signature)) => Ok((address, message, signature)),
            (address, message, signature) => {
                let missing = [
                    ("address", address.is_none()),
                    ("message", message.is_none()),
                    ("signature", signature.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, missing)| missing.then_some(name))
                .collect();
                Err(AuthError::MissingParameters(missing))
            }
        }
    }
}

/// Outcome of a sign-in attempt as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub ok: bool,
    /// EIP-55 address of the authenticated signer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Error code of a rejected attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<SignatureScheme>,
}

impl VerificationResult {
    pub fn verified(address: Address, scheme: SignatureScheme) -> Self {
        Self {
            ok: true,
            address: Some(address.to_checksum(None)),
            reason: None,
            scheme: Some(scheme),
        }
    }

    pub fn rejected(error: &AuthError) -> Self {
        Self {
            ok: false,
            address: None,
            reason: Some(error.code().to_string()),
            scheme: None,
        }
    }
}

/// Lifecycle of one sign-in attempt.
///
/// `Issued -> Verifying -> Verified | Rejected`. The nonce is consumed on
/// the way into `Verifying`, so a rejected attempt always needs a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Issued,
    Verifying,
    Verified,
    Rejected,
}

impl AttemptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptState::Issued => "issued",
            AttemptState::Verifying => "verifying",
            AttemptState::Verified => "verified",
            AttemptState::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Verified | AttemptState::Rejected)
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Attempt<'a> {
    nonce: &'a str,
    state: AttemptState,
}

impl<'a> Attempt<'a> {
    fn new(nonce: &'a str) -> Self {
        Self {
            nonce,
            state: AttemptState::Issued,
        }
    }

    fn advance(&mut self, next: AttemptState) {
        if self.state.is_terminal() {
            return;
        }
        tracing::debug!(nonce = %self.nonce, from = %self.state, to = %next, "sign-in attempt");
        self.state = next;
    }

    fn finish<T>(&mut self, result: Result<T, AuthError>) -> Result<T, AuthError> {
        self.advance(if result.is_ok() {
            AttemptState::Verified
        } else {
            AttemptState::Rejected
        });
        result
    }
}

/// The sign-in flow: issue a nonce, then verify the signed message that
/// embeds it.
///
/// # Example
///
/// ```rust
/// use siwe_nonce_auth::nonce::{AuthConfig, ConfigPreset, NonceStore};
/// use siwe_nonce_auth::siwe::{AuthProtocol, ChainRegistry, SignatureVerifier};
/// use siwe_nonce_auth::storage::MemoryStorage;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AuthConfig::from(ConfigPreset::Production);
/// let nonces = NonceStore::builder(Arc::new(MemoryStorage::new()))
///     .with_config(&config)
///     .build_and_init()
///     .await?;
/// let verifier = SignatureVerifier::new(ChainRegistry::new());
/// let protocol = AuthProtocol::new(Arc::new(nonces), verifier, config);
///
/// let nonce = protocol.issue_nonce().await?;
/// assert_eq!(nonce.value.len(), 32);
/// # Ok(())
/// # }
/// ```
pub struct AuthProtocol {
    nonces: Arc<NonceStore>,
    verifier: SignatureVerifier,
    config: AuthConfig,
}

impl AuthProtocol {
    pub fn new(nonces: Arc<NonceStore>, verifier: SignatureVerifier, config: AuthConfig) -> Self {
        Self {
            nonces,
            verifier,
            config,
        }
    }

    pub fn nonces(&self) -> &Arc<NonceStore> {
        &self.nonces
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Issues a fresh single-use nonce.
    pub async fn issue_nonce(&self) -> Result<Nonce, AuthError> {
        self.nonces.issue().await.map_err(|e| {
            tracing::error!("Failed to issue nonce: {}", e);
            AuthError::InternalError
        })
    }

    /// Renders the message a wallet should sign for `nonce`.
    ///
    /// The message is valid from the nonce's issue time until its expiry.
    /// The configured domain and statement take precedence over `domain`.
    pub fn challenge_message(
        &self,
        domain: &str,
        address: Address,
        chain_id: u64,
        nonce: &Nonce,
    ) -> String {
        SiweMessage::build(&MessageParams {
            domain: self.config.domain.as_deref().unwrap_or(domain).to_string(),
            address,
            statement: self.config.statement.clone(),
            chain_id,
            nonce: nonce.value.clone(),
            issued_at: DateTime::from_timestamp_millis(nonce.issued_at),
            expiration_time: DateTime::from_timestamp_millis(nonce.expires_at),
            ..MessageParams::default()
        })
    }

    /// Verifies a signed message and burns its nonce.
    ///
    /// The nonce is consumed before the signature is checked, so every
    /// attempt that gets past parsing uses it up, whatever the outcome.
    pub async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationResult, AuthError> {
        #[cfg(feature = "metrics")]
        let start_time = Instant::now();

        let result = self.verify_request(request).await;

        #[cfg(feature = "metrics")]
        self.nonces
            .metrics_collector()
            .record_event(MetricEvent::VerificationAttempt {
                duration: start_time.elapsed(),
                scheme: result
                    .as_ref()
                    .ok()
                    .and_then(|r| r.scheme)
                    .map(|s| s.as_str()),
                error_code: result.as_ref().err().map(AuthError::code),
            })
            .await;

        match &result {
            Ok(verified) => tracing::info!(
                address = verified.address.as_deref().unwrap_or_default(),
                scheme = ?verified.scheme,
                "sign-in verified"
            ),
            Err(e) => tracing::info!(reason = e.code(), "sign-in rejected: {}", e),
        }
        result
    }

    /// Like [`verify`](Self::verify), folding errors into a rejected result.
    pub async fn authenticate(&self, request: &VerificationRequest) -> VerificationResult {
        match self.verify(request).await {
            Ok(result) => result,
            Err(e) => VerificationResult::rejected(&e),
        }
    }

    async fn verify_request(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationResult, AuthError> {
        let (address, message, signature) = request.required_fields()?;
        let siwe = SiweMessage::parse(message)?;

        let mut attempt = Attempt::new(&siwe.nonce);
        let consumed = self.consume_nonce(&siwe.nonce).await;
        if let Err(e) = consumed {
            return attempt.finish(Err(e));
        }
        attempt.advance(AttemptState::Verifying);

        let result = self.verify_consumed(&siwe, address, message, signature).await;
        attempt.finish(result)
    }

    async fn consume_nonce(&self, nonce: &str) -> Result<(), AuthError> {
        match self.nonces.consume(nonce).await {
            Ok(ConsumeOutcome::Ok) => Ok(()),
            Ok(outcome) => {
                tracing::debug!(nonce, outcome = %outcome, "nonce rejected");
                Err(AuthError::InvalidNonce)
            }
            Err(e) => {
                tracing::error!("Nonce storage failure: {}", e);
                Err(AuthError::InternalError)
            }
        }
    }

    async fn verify_consumed(
        &self,
        siwe: &SiweMessage,
        address: &str,
        message: &str,
        signature: &str,
    ) -> Result<VerificationResult, AuthError> {
        let requested = normalize_address(address).map_err(map_verify_error)?;
        if requested != siwe.address {
            tracing::debug!(%requested, message_address = %siwe.address, "address mismatch");
            return Err(AuthError::InvalidSignature);
        }

        if let Some(domain) = &self.config.domain {
            if &siwe.domain != domain {
                tracing::debug!(expected = %domain, actual = %siwe.domain, "domain mismatch");
                return Err(AuthError::InvalidSignature);
            }
        }

        if !self.config.allows_chain(siwe.chain_id) {
            tracing::debug!(chain_id = siwe.chain_id, "chain not allowed");
            return Err(AuthError::InvalidSignature);
        }

        let now = self
            .nonces
            .now_millis()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or(AuthError::InternalError)?;
        if siwe.is_expired_at(now) || siwe.is_not_yet_valid_at(now) {
            tracing::debug!(nonce = %siwe.nonce, "message outside its validity window");
            return Err(AuthError::InvalidNonce);
        }

        let verdict = self
            .verifier
            .check(address, message, signature, siwe.chain_id)
            .await
            .map_err(map_verify_error)?;

        match verdict {
            Verdict::Valid(scheme) => Ok(VerificationResult::verified(siwe.address, scheme)),
            Verdict::Invalid => Err(AuthError::InvalidSignature),
        }
    }
}

fn map_verify_error(error: VerifyError) -> AuthError {
    match error {
        VerifyError::Malformed(reason) => AuthError::MalformedMessage(reason),
        VerifyError::UnsupportedChain(chain_id) => {
            tracing::debug!(chain_id, "no chain client for contract wallet check");
            AuthError::InvalidSignature
        }
        VerifyError::Unavailable(reason) => {
            tracing::warn!("Signature verification unavailable: {}", reason);
            AuthError::VerificationUnavailable
        }
    }
}
