use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use alloy_primitives::{Address, B256, Bytes, Signature, eip191_hash_message};
use serde::Serialize;

use super::chain::{ChainClient, ChainError, ChainRegistry};
use super::erc6492::{self, Erc6492Signature};
use super::error::VerifyError;

/// Upper bound for the whole on-chain check, retry included.
pub const DEFAULT_VERIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// On-chain verification is retried once on a transient failure.
const MAX_ATTEMPTS: u32 = 2;

/// How a valid signature was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureScheme {
    /// ECDSA over the EIP-191 personal message hash
    Eoa,
    /// `isValidSignature` on a deployed contract wallet
    Erc1271,
    /// ERC-6492 wrapper, checked against a deployed or simulated wallet
    Erc6492,
}

impl SignatureScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureScheme::Eoa => "eoa",
            SignatureScheme::Erc1271 => "erc1271",
            SignatureScheme::Erc6492 => "erc6492",
        }
    }
}

impl std::fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid(SignatureScheme),
    Invalid,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid(_))
    }

    pub fn scheme(&self) -> Option<SignatureScheme> {
        match self {
            Verdict::Valid(scheme) => Some(*scheme),
            Verdict::Invalid => None,
        }
    }
}

/// Decides whether an address signed a message.
///
/// Plain ECDSA signatures are checked locally. Anything else, or an ECDSA
/// signature that recovers to a different address, is checked on-chain
/// through the [`ChainClient`] registered for the message's chain id:
///
/// - ERC-6492 wrapped: `isValidSignature` on the wallet if it is deployed,
///   otherwise (or if that fails) an `eth_simulateV1` batch that runs the
///   factory call and then `isValidSignature`.
/// - Unwrapped: `isValidSignature` if the address has code, otherwise
///   [`Verdict::Invalid`].
///
/// The on-chain part is bounded by one overall timeout. A transport error
/// or a timed out attempt is retried once within what is left of it: the
/// first attempt gets half the budget, the retry gets the remainder.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    chains: ChainRegistry,
    timeout: Duration,
}

impl SignatureVerifier {
    pub fn new(chains: ChainRegistry) -> Self {
        Self {
            chains,
            timeout: DEFAULT_VERIFICATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn chains(&self) -> &ChainRegistry {
        &self.chains
    }

    /// Returns `true` if `signature` is a valid signature of `message` by `address`.
    ///
    /// `address` and `signature` are hex, with or without a `0x`/`0X`
    /// prefix, in any letter case.
    pub async fn verify(
        &self,
        address: &str,
        message: &str,
        signature: &str,
        chain_id: u64,
    ) -> Result<bool, VerifyError> {
        Ok(self
            .check(address, message, signature, chain_id)
            .await?
            .is_valid())
    }

    /// Like [`verify`](Self::verify), reporting which scheme succeeded.
    pub async fn check(
        &self,
        address: &str,
        message: &str,
        signature: &str,
        chain_id: u64,
    ) -> Result<Verdict, VerifyError> {
        let address = normalize_address(address)?;
        let signature = decode_signature(signature)?;
        let hash = eip191_hash_message(message);
        let wrapped = erc6492::unwrap(&signature)?;

        if wrapped.is_none() && recover_eoa(&signature, &hash) == Some(address) {
            tracing::debug!(%address, "signature recovered to signer");
            return Ok(Verdict::Valid(SignatureScheme::Eoa));
        }

        let client = self
            .chains
            .get(chain_id)
            .ok_or(VerifyError::UnsupportedChain(chain_id))?;

        let verdict = self
            .check_on_chain_with_retry(
                &client,
                chain_id,
                address,
                hash,
                &signature,
                wrapped.as_ref(),
            )
            .await?;
        tracing::debug!(%address, chain_id, ?verdict, "on-chain signature check finished");
        Ok(verdict)
    }

    async fn check_on_chain_with_retry(
        &self,
        client: &Arc<dyn ChainClient>,
        chain_id: u64,
        address: Address,
        hash: B256,
        signature: &Bytes,
        wrapped: Option<&Erc6492Signature>,
    ) -> Result<Verdict, VerifyError> {
        let mut last_error = String::new();
        let deadline = Instant::now() + self.timeout;

        for attempt in 1..=MAX_ATTEMPTS {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let budget = remaining / (MAX_ATTEMPTS - attempt + 1);
            let result = tokio::time::timeout(
                budget,
                check_on_chain(client.as_ref(), address, hash, signature, wrapped),
            )
            .await;

            match result {
                Ok(Ok(verdict)) => return Ok(verdict),
                Ok(Err(e)) if e.is_transient() => {
                    tracing::warn!(chain_id, attempt, error = %e, "on-chain verification failed");
                    last_error = e.to_string();
                }
                Ok(Err(e)) => return Err(VerifyError::Unavailable(e.to_string())),
                Err(_) => {
                    tracing::warn!(
                        chain_id,
                        attempt,
                        timeout_ms = budget.as_millis() as u64,
                        "on-chain verification timed out"
                    );
                    last_error = format!("timed out after {budget:?}");
                }
            }
        }

        Err(VerifyError::Unavailable(last_error))
    }
}

async fn check_on_chain(
    client: &dyn ChainClient,
    address: Address,
    hash: B256,
    signature: &Bytes,
    wrapped: Option<&Erc6492Signature>,
) -> Result<Verdict, ChainError> {
    let code = client.get_code(address).await?;

    let Some(wrapped) = wrapped else {
        if code.is_empty() {
            return Ok(Verdict::Invalid);
        }
        let valid = erc1271_is_valid(client, address, hash, signature.clone()).await?;
        return Ok(if valid {
            Verdict::Valid(SignatureScheme::Erc1271)
        } else {
            Verdict::Invalid
        });
    };

    if !code.is_empty() && erc1271_is_valid(client, address, hash, wrapped.inner.clone()).await? {
        return Ok(Verdict::Valid(SignatureScheme::Erc6492));
    }

    let outcomes = client
        .simulate(vec![
            wrapped.deploy_call(),
            erc6492::is_valid_signature_call(address, hash, wrapped.inner.clone()),
        ])
        .await?;

    // The deploy call may revert when the wallet already exists; only the check counts
    let valid = outcomes
        .get(1)
        .is_some_and(|outcome| outcome.success && erc6492::is_magic_value(&outcome.return_data));

    Ok(if valid {
        Verdict::Valid(SignatureScheme::Erc6492)
    } else {
        Verdict::Invalid
    })
}

async fn erc1271_is_valid(
    client: &dyn ChainClient,
    wallet: Address,
    hash: B256,
    signature: Bytes,
) -> Result<bool, ChainError> {
    match client
        .call(erc6492::is_valid_signature_call(wallet, hash, signature))
        .await
    {
        Ok(return_data) => Ok(erc6492::is_magic_value(&return_data)),
        Err(ChainError::Reverted(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

fn recover_eoa(signature: &[u8], hash: &B256) -> Option<Address> {
    let signature = match signature.len() {
        65 => Signature::from_raw(signature).ok()?.normalized_s(),
        64 => Signature::from_erc2098(signature).normalized_s(),
        _ => return None,
    };
    signature.recover_address_from_prehash(hash).ok()
}

fn strip_hex_prefix(raw: &str) -> &str {
    raw.strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw)
}

/// Parses a hex address, accepting an optional `0x`/`0X` prefix and any case.
pub fn normalize_address(raw: &str) -> Result<Address, VerifyError> {
    let hex = strip_hex_prefix(raw.trim());
    if hex.len() != 40 {
        return Err(VerifyError::Malformed(format!(
            "address must be 20 bytes of hex, got {:?}",
            raw
        )));
    }
    format!("0x{}", hex.to_ascii_lowercase())
        .parse::<Address>()
        .map_err(|e| VerifyError::Malformed(format!("invalid address {raw:?}: {e}")))
}

fn decode_signature(raw: &str) -> Result<Bytes, VerifyError> {
    let hex = strip_hex_prefix(raw.trim());
    if hex.is_empty() {
        return Err(VerifyError::Malformed("empty signature".to_string()));
    }
    hex::decode(hex)
        .map(Bytes::from)
        .map_err(|e| VerifyError::Malformed(format!("invalid signature hex: {e}")))
}
