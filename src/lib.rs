//! # SIWE Nonce Auth
//!
//! Sign-In with Ethereum (EIP-4361) challenge/response authentication.
//!
//! The server hands out a single-use nonce, the wallet signs a message that
//! embeds it, and the server checks the signature before reporting the user
//! as authenticated. Each nonce can be consumed at most once, even under
//! concurrent requests, and expires after a configurable TTL.
//!
//! ## Features
//!
//! - **Single-Use Nonces**: 128-bit random values with atomic consume
//! - **Pluggable Storage**: in-memory, SQLite (`sqlite-storage`) or Redis (`redis-storage`)
//! - **Strict EIP-4361 Codec**: structured parsing, no text searching
//! - **EOA Signatures**: EIP-191 personal-sign recovery, 65-byte or compact
//! - **Contract Wallets**: ERC-1271 for deployed wallets, ERC-6492 for undeployed ones
//! - **HTTP Endpoints**: an `axum` router for `/auth/nonce` and `/auth/verify` (`http`)
//!
//! ## Quick Start
//!
//! ```rust
//! use siwe_nonce_auth::nonce::{AuthConfig, ConfigPreset, NonceStore};
//! use siwe_nonce_auth::siwe::{AuthProtocol, ChainRegistry, SignatureVerifier, VerificationRequest};
//! use siwe_nonce_auth::storage::MemoryStorage;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::from(ConfigPreset::Production);
//! let nonces = NonceStore::builder(Arc::new(MemoryStorage::new()))
//!     .with_config(&config)
//!     .build_and_init()
//!     .await?;
//! let protocol = AuthProtocol::new(
//!     Arc::new(nonces),
//!     SignatureVerifier::new(ChainRegistry::new()),
//!     config,
//! );
//!
//! // 1. Hand the nonce to the client
//! let nonce = protocol.issue_nonce().await?;
//!
//! // 2. The wallet signs a message containing it; the client posts it back
//! # let (address, message, signature) = (String::new(), String::new(), String::new());
//! let result = protocol
//!     .authenticate(&VerificationRequest::new(address, message, signature))
//!     .await;
//! if result.ok {
//!     println!("signed in as {:?}", result.address);
//! }
//! # let _ = nonce;
//! # Ok(())
//! # }
//! ```
//!
//! ## Contract Wallets
//!
//! Signatures that do not recover to the claimed address are checked
//! on-chain. Register a [`ChainClient`](siwe::ChainClient) per chain id:
//!
//! ```rust,no_run
//! # #[cfg(feature = "rpc-http")]
//! # fn example() -> Result<(), siwe_nonce_auth::siwe::ChainError> {
//! use siwe_nonce_auth::siwe::{ChainRegistry, HttpChainClient, SignatureVerifier};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let chains = ChainRegistry::new()
//!     .with_client(8453, Arc::new(HttpChainClient::new("https://mainnet.base.org")?));
//! let verifier = SignatureVerifier::new(chains).with_timeout(Duration::from_secs(5));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **[`NonceStore`]**: issue, consume and sweep nonces over a [`storage::NonceStorage`]
//! - **[`SiweMessage`]**: build and parse the EIP-4361 text
//! - **[`SignatureVerifier`]**: EOA, ERC-1271 and ERC-6492 checks
//! - **[`AuthProtocol`]**: the two-phase flow with its error taxonomy ([`AuthError`])

pub mod nonce;
pub mod siwe;

#[cfg(feature = "http")]
pub mod http;

pub use nonce::storage;

// Re-export commonly used types
pub use nonce::{AuthConfig, ConfigPreset, NonceError, NonceStore};
pub use siwe::{
    AuthError, AuthProtocol, SignatureScheme, SignatureVerifier, SiweMessage,
    VerificationRequest, VerificationResult,
};
