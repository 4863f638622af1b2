//! End-to-end sign-in flows over `AuthProtocol`.

use alloy_primitives::{Address, B256, Bytes, address, eip191_hash_message};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use siwe_nonce_auth::nonce::{AuthConfig, ConfigPreset, NonceStore};
use siwe_nonce_auth::siwe::erc6492::{self, Erc6492Signature};
use siwe_nonce_auth::siwe::{
    AuthError, AuthProtocol, CallOutcome, CallRequest, ChainClient, ChainError, ChainRegistry,
    MessageParams, SignatureScheme, SignatureVerifier, SiweMessage, VerificationRequest,
};
use siwe_nonce_auth::storage::MemoryStorage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const DOMAIN: &str = "app.example.com";
const BASE: u64 = 8453;
const SMART_WALLET: Address = address!("0x5a11e7000000000000000000000000000000c0de");
const FACTORY: Address = address!("0x00000000000000000000000000000000000fac70");

fn owner() -> PrivateKeySigner {
    PrivateKeySigner::from_bytes(&B256::from([0x42u8; 32])).expect("valid secret")
}

fn hex_signature(signer: &PrivateKeySigner, message: &str) -> String {
    let signature = signer.sign_message_sync(message.as_bytes()).unwrap();
    format!("0x{}", hex::encode(signature.as_bytes()))
}

/// Base chain where `SMART_WALLET` is counterfactual: no code, but a
/// simulated deployment accepts one specific `isValidSignature` call.
#[derive(Default)]
struct CounterfactualChain {
    accepted_check: Mutex<Option<CallRequest>>,
    simulations: Mutex<usize>,
}

#[async_trait]
impl ChainClient for CounterfactualChain {
    async fn get_code(&self, _address: Address) -> Result<Bytes, ChainError> {
        Ok(Bytes::new())
    }

    async fn call(&self, _request: CallRequest) -> Result<Bytes, ChainError> {
        Err(ChainError::Reverted("no contract".to_string()))
    }

    async fn simulate(&self, calls: Vec<CallRequest>) -> Result<Vec<CallOutcome>, ChainError> {
        *self.simulations.lock().unwrap() += 1;
        let deployed = calls.first().is_some_and(|c| c.to == FACTORY);
        let accepted = self.accepted_check.lock().unwrap().clone();
        let valid = deployed && calls.get(1) == accepted.as_ref();

        let mut magic = vec![0u8; 32];
        magic[..4].copy_from_slice(&erc6492::ERC1271_MAGIC_VALUE);
        Ok(vec![
            CallOutcome {
                success: true,
                return_data: Bytes::new(),
            },
            CallOutcome {
                success: valid,
                return_data: if valid { magic.into() } else { Bytes::new() },
            },
        ])
    }
}

/// A node that never answers: every request fails at the transport level.
#[derive(Default)]
struct UnreachableChain {
    requests: AtomicUsize,
}

#[async_trait]
impl ChainClient for UnreachableChain {
    async fn get_code(&self, _address: Address) -> Result<Bytes, ChainError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Err(ChainError::Transport("connection refused".to_string()))
    }

    async fn call(&self, _request: CallRequest) -> Result<Bytes, ChainError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Err(ChainError::Transport("connection refused".to_string()))
    }

    async fn simulate(&self, _calls: Vec<CallRequest>) -> Result<Vec<CallOutcome>, ChainError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Err(ChainError::Transport("connection refused".to_string()))
    }
}

async fn setup() -> (AuthProtocol, Arc<CounterfactualChain>) {
    let chain = Arc::new(CounterfactualChain::default());
    (protocol_on(chain.clone()).await, chain)
}

async fn protocol_on(chain: Arc<dyn ChainClient>) -> AuthProtocol {
    let config = AuthConfig {
        domain: Some(DOMAIN.to_string()),
        allowed_chain_ids: vec![BASE],
        statement: Some("Sign in to Example".to_string()),
        ..AuthConfig::from(ConfigPreset::Production)
    };
    let nonces = NonceStore::builder(Arc::new(MemoryStorage::new()))
        .with_config(&config)
        .build_and_init()
        .await
        .unwrap();
    let verifier = SignatureVerifier::new(ChainRegistry::new().with_client(BASE, chain));
    AuthProtocol::new(Arc::new(nonces), verifier, config)
}

async fn signed_by_owner(protocol: &AuthProtocol) -> VerificationRequest {
    let signer = owner();
    let nonce = protocol.issue_nonce().await.unwrap();
    let message = protocol.challenge_message(DOMAIN, signer.address(), BASE, &nonce);
    let signature = hex_signature(&signer, &message);
    VerificationRequest::new(signer.address().to_string(), message, signature)
}

#[tokio::test]
async fn test_eoa_sign_in_succeeds() {
    let (protocol, chain) = setup().await;
    let request = signed_by_owner(&protocol).await;

    let result = protocol.verify(&request).await.unwrap();
    assert!(result.ok);
    assert_eq!(result.address, Some(owner().address().to_checksum(None)));
    assert_eq!(result.scheme, Some(SignatureScheme::Eoa));
    assert_eq!(*chain.simulations.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_replayed_message_is_rejected() {
    let (protocol, _) = setup().await;
    let request = signed_by_owner(&protocol).await;

    assert!(protocol.verify(&request).await.unwrap().ok);
    assert_eq!(
        protocol.verify(&request).await,
        Err(AuthError::InvalidNonce)
    );
}

#[tokio::test]
async fn test_tampered_signature_is_rejected() {
    let (protocol, _) = setup().await;
    let mut request = signed_by_owner(&protocol).await;

    let mut signature: Vec<char> = request.signature.as_deref().unwrap().chars().collect();
    signature[10] = if signature[10] == '0' { '1' } else { '0' };
    request.signature = Some(signature.into_iter().collect());

    assert_eq!(
        protocol.verify(&request).await,
        Err(AuthError::InvalidSignature)
    );
}

#[tokio::test]
async fn test_never_issued_nonce_is_rejected() {
    let (protocol, _) = setup().await;
    let signer = owner();
    let message = SiweMessage::build(&MessageParams {
        domain: DOMAIN.to_string(),
        address: signer.address(),
        chain_id: BASE,
        nonce: "f00df00df00df00df00df00df00df00d".to_string(),
        ..MessageParams::default()
    });
    let request = VerificationRequest::new(
        signer.address().to_string(),
        message.clone(),
        hex_signature(&signer, &message),
    );

    assert_eq!(
        protocol.verify(&request).await,
        Err(AuthError::InvalidNonce)
    );
}

#[tokio::test]
async fn test_message_without_nonce_is_malformed() {
    let (protocol, _) = setup().await;
    let request = signed_by_owner(&protocol).await;
    let message = request.message.clone().unwrap();
    let without_nonce: String = message
        .lines()
        .filter(|line| !line.starts_with("Nonce: "))
        .collect::<Vec<_>>()
        .join("\n");

    let result = protocol
        .verify(&VerificationRequest {
            message: Some(without_nonce),
            ..request
        })
        .await;
    assert!(matches!(result, Err(AuthError::MalformedMessage(_))));
}

#[tokio::test]
async fn test_counterfactual_smart_wallet_signs_in() {
    let (protocol, chain) = setup().await;
    let nonce = protocol.issue_nonce().await.unwrap();
    let message = protocol.challenge_message(DOMAIN, SMART_WALLET, BASE, &nonce);

    // The owner key signs; the wallet wraps it for a not-yet-deployed account
    let inner = owner().sign_message_sync(message.as_bytes()).unwrap();
    let wrapped = Erc6492Signature {
        factory: FACTORY,
        factory_calldata: Bytes::from(vec![0x5f, 0xbf, 0xb9, 0xcf, 0x01]),
        inner: Bytes::from(inner.as_bytes().to_vec()),
    };
    *chain.accepted_check.lock().unwrap() = Some(erc6492::is_valid_signature_call(
        SMART_WALLET,
        eip191_hash_message(&message),
        wrapped.inner.clone(),
    ));

    let result = protocol
        .verify(&VerificationRequest::new(
            SMART_WALLET.to_string(),
            message,
            wrapped.to_bytes().to_string(),
        ))
        .await
        .unwrap();

    assert!(result.ok);
    assert_eq!(result.scheme, Some(SignatureScheme::Erc6492));
    assert_eq!(result.address, Some(SMART_WALLET.to_checksum(None)));
    assert_eq!(*chain.simulations.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_smart_wallet_with_wrong_inner_signature_is_rejected() {
    let (protocol, chain) = setup().await;
    let nonce = protocol.issue_nonce().await.unwrap();
    let message = protocol.challenge_message(DOMAIN, SMART_WALLET, BASE, &nonce);

    let wrapped = Erc6492Signature {
        factory: FACTORY,
        factory_calldata: Bytes::from(vec![0x01]),
        inner: Bytes::from(vec![0x99; 65]),
    };
    // The chain accepts nothing
    *chain.accepted_check.lock().unwrap() = None;

    let result = protocol
        .authenticate(&VerificationRequest::new(
            SMART_WALLET.to_string(),
            message,
            wrapped.to_bytes().to_string(),
        ))
        .await;
    assert!(!result.ok);
    assert_eq!(result.reason.as_deref(), Some("invalid_signature"));
}

#[tokio::test]
async fn test_unreachable_chain_is_unavailable_and_burns_the_nonce() {
    let chain = Arc::new(UnreachableChain::default());
    let protocol = protocol_on(chain.clone()).await;
    let nonce = protocol.issue_nonce().await.unwrap();
    let message = protocol.challenge_message(DOMAIN, SMART_WALLET, BASE, &nonce);
    let request = VerificationRequest::new(
        SMART_WALLET.to_string(),
        message.clone(),
        hex_signature(&owner(), &message),
    );

    assert_eq!(
        protocol.verify(&request).await,
        Err(AuthError::VerificationUnavailable)
    );
    // One attempt plus one retry
    assert_eq!(chain.requests.load(Ordering::SeqCst), 2);

    let result = protocol.authenticate(&request).await;
    assert!(!result.ok);
    assert_eq!(result.reason.as_deref(), Some("invalid_nonce"));
    assert_eq!(chain.requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unconfigured_chain_rejects_contract_signature() {
    let (protocol, _) = setup().await;
    let nonce = protocol.issue_nonce().await.unwrap();
    // Same nonces and config, but no chain client for BASE
    let protocol = AuthProtocol::new(
        Arc::clone(protocol.nonces()),
        SignatureVerifier::new(ChainRegistry::new()),
        protocol.config().clone(),
    );
    let message = protocol.challenge_message(DOMAIN, SMART_WALLET, BASE, &nonce);
    let request = VerificationRequest::new(
        SMART_WALLET.to_string(),
        message.clone(),
        hex_signature(&owner(), &message),
    );

    assert_eq!(
        protocol.verify(&request).await,
        Err(AuthError::InvalidSignature)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_of_one_message_verify_once() {
    let (protocol, _) = setup().await;
    let protocol = Arc::new(protocol);
    let request = Arc::new(signed_by_owner(&protocol).await);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let protocol = Arc::clone(&protocol);
            let request = Arc::clone(&request);
            tokio::spawn(async move { protocol.verify(&request).await })
        })
        .collect();

    let mut verified = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(result) => {
                assert!(result.ok);
                verified += 1;
            }
            Err(e) => assert_eq!(e, AuthError::InvalidNonce),
        }
    }
    assert_eq!(verified, 1);
}
