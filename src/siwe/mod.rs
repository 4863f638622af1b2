//! Sign-In with Ethereum: message codec, signature verification and the
//! challenge/response protocol built on top of [`crate::nonce`].

pub mod chain;
pub mod erc6492;
mod error;
pub mod message;
mod protocol;
mod verifier;

pub use chain::{CallOutcome, CallRequest, ChainClient, ChainError, ChainRegistry};
#[cfg(feature = "rpc-http")]
pub use chain::HttpChainClient;
pub use error::{AuthError, ParseError, VerifyError};
pub use message::{MessageParams, SiweMessage, parse_address, parse_chain_id, parse_nonce};
pub use protocol::{AttemptState, AuthProtocol, VerificationRequest, VerificationResult};
pub use verifier::{
    DEFAULT_VERIFICATION_TIMEOUT, SignatureScheme, SignatureVerifier, Verdict, normalize_address,
};
