use thiserror::Error;

/// Errors raised while parsing an EIP-4361 message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("SIWE message is empty")]
    EmptyMessage,

    #[error("invalid SIWE header format")]
    InvalidHeader,

    #[error("missing required SIWE field: {0}")]
    MissingField(&'static str),

    #[error("invalid SIWE address: {0}")]
    InvalidAddress(String),

    #[error("invalid SIWE field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unsupported SIWE version: expected 1, got {0}")]
    UnsupportedVersion(String),

    #[error("invalid SIWE nonce: {0}")]
    InvalidNonce(String),

    #[error("unexpected line {line} in SIWE message: {content}")]
    UnexpectedLine { line: usize, content: String },
}

/// Errors raised by [`SignatureVerifier`](crate::siwe::SignatureVerifier).
///
/// A signature that simply does not match is never an error; it is
/// [`Verdict::Invalid`](crate::siwe::Verdict::Invalid).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// The address or signature could not be decoded.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// Contract-wallet verification needs a chain client for this chain id.
    #[error("no chain client configured for chain id {0}")]
    UnsupportedChain(u64),

    /// The chain RPC endpoint failed or timed out, after one retry.
    #[error("on-chain verification unavailable: {0}")]
    Unavailable(String),
}

/// The error taxonomy of a sign-in attempt.
///
/// Each variant has a stable wire code ([`code`](Self::code)) and an HTTP
/// status ([`status`](Self::status)). Clients must restart the flow with a
/// fresh nonce after any of them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing parameters: {}", .0.join(", "))]
    MissingParameters(Vec<&'static str>),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Unknown, expired or already consumed. Deliberately not more specific.
    #[error("invalid or expired nonce")]
    InvalidNonce,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("signature verification is temporarily unavailable")]
    VerificationUnavailable,

    #[error("internal server error")]
    InternalError,
}

impl AuthError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingParameters(_) => "missing_parameters",
            AuthError::MalformedMessage(_) => "malformed_message",
            AuthError::InvalidNonce => "invalid_nonce",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::VerificationUnavailable => "verification_unavailable",
            AuthError::InternalError => "internal_error",
        }
    }

    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            AuthError::MissingParameters(_) | AuthError::MalformedMessage(_) => 400,
            AuthError::InvalidNonce | AuthError::InvalidSignature => 401,
            AuthError::VerificationUnavailable | AuthError::InternalError => 500,
        }
    }
}

impl From<ParseError> for AuthError {
    fn from(error: ParseError) -> Self {
        AuthError::MalformedMessage(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        let cases = [
            (AuthError::MissingParameters(vec!["address"]), "missing_parameters", 400),
            (AuthError::MalformedMessage("x".into()), "malformed_message", 400),
            (AuthError::InvalidNonce, "invalid_nonce", 401),
            (AuthError::InvalidSignature, "invalid_signature", 401),
            (AuthError::VerificationUnavailable, "verification_unavailable", 500),
            (AuthError::InternalError, "internal_error", 500),
        ];
        for (error, code, status) in cases {
            assert_eq!(error.code(), code);
            assert_eq!(error.status(), status);
        }
    }

    #[test]
    fn test_missing_parameters_display() {
        let error = AuthError::MissingParameters(vec!["message", "signature"]);
        assert_eq!(error.to_string(), "missing parameters: message, signature");
    }

    #[test]
    fn test_parse_error_becomes_malformed_message() {
        let error: AuthError = ParseError::MissingField("Nonce").into();
        assert_eq!(
            error,
            AuthError::MalformedMessage("missing required SIWE field: Nonce".to_string())
        );
    }
}
