//! Read-only chain access used for contract wallet verification.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use thiserror::Error;

/// A single `eth_call`-style message call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub to: Address,
    pub data: Bytes,
}

/// Result of one call inside an `eth_simulateV1` batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub success: bool,
    pub return_data: Bytes,
}

/// Errors reported by a [`ChainClient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Network failure or an unavailable endpoint.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node executed the call and it reverted.
    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("invalid chain client configuration: {0}")]
    Config(String),
}

impl ChainError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transport(_))
    }
}

/// The RPC surface needed to verify ERC-1271 and ERC-6492 signatures.
///
/// All methods run against the latest block.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `eth_getCode`. Empty bytes means no contract is deployed.
    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError>;

    /// `eth_call`. Returns the raw return data.
    async fn call(&self, request: CallRequest) -> Result<Bytes, ChainError>;

    /// `eth_simulateV1` with all calls in one simulated block, executed in
    /// order so later calls observe the state changes of earlier ones.
    async fn simulate(&self, calls: Vec<CallRequest>) -> Result<Vec<CallOutcome>, ChainError>;
}

/// Chain clients keyed by EIP-155 chain id.
#[derive(Clone, Default)]
pub struct ChainRegistry {
    clients: HashMap<u64, Arc<dyn ChainClient>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the client for `chain_id`.
    pub fn insert(&mut self, chain_id: u64, client: Arc<dyn ChainClient>) {
        self.clients.insert(chain_id, client);
    }

    pub fn with_client(mut self, chain_id: u64, client: Arc<dyn ChainClient>) -> Self {
        self.insert(chain_id, client);
        self
    }

    pub fn get(&self, chain_id: u64) -> Option<Arc<dyn ChainClient>> {
        self.clients.get(&chain_id).cloned()
    }

    /// Configured chain ids in ascending order.
    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl fmt::Debug for ChainRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainRegistry")
            .field("chain_ids", &self.chain_ids())
            .finish()
    }
}

#[cfg(feature = "rpc-http")]
pub use http_client::HttpChainClient;

#[cfg(feature = "rpc-http")]
mod http_client {
    use super::*;

    use alloy_primitives::U64;
    use alloy_provider::{Provider, RootProvider};
    use alloy_rpc_types_eth::TransactionRequest;
    use serde::{Deserialize, Serialize};

    /// [`ChainClient`] over a JSON-RPC HTTP endpoint.
    #[derive(Clone)]
    pub struct HttpChainClient {
        provider: RootProvider,
        endpoint: String,
    }

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct SimulatePayload {
        block_state_calls: Vec<BlockStateCall>,
        validation: bool,
    }

    #[derive(Debug, Clone, Serialize)]
    struct BlockStateCall {
        calls: Vec<SimulatedCallRequest>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct SimulatedCallRequest {
        to: Address,
        data: Bytes,
    }

    #[derive(Debug, Deserialize)]
    struct SimulatedBlock {
        calls: Vec<SimulatedCallResult>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct SimulatedCallResult {
        return_data: Bytes,
        status: U64,
    }

    impl HttpChainClient {
        pub fn new(endpoint: &str) -> Result<Self, ChainError> {
            let url = endpoint
                .parse::<url::Url>()
                .map_err(|e| ChainError::Config(format!("{endpoint}: {e}")))?;
            Ok(Self {
                provider: RootProvider::new_http(url),
                endpoint: endpoint.to_string(),
            })
        }

        pub fn endpoint(&self) -> &str {
            &self.endpoint
        }
    }

    /// JSON-RPC code for a reverted `eth_call`.
    const EXECUTION_REVERTED: i64 = 3;
    const METHOD_NOT_FOUND: i64 = -32601;

    /// Classifies a JSON-RPC error payload.
    ///
    /// Only an execution revert says something about the signature. Rate
    /// limits, missing headers and internal node errors are transport
    /// failures and may be retried.
    pub(super) fn rpc_error(code: i64, message: &str) -> ChainError {
        if code == EXECUTION_REVERTED || message.to_ascii_lowercase().contains("execution reverted")
        {
            ChainError::Reverted(message.to_string())
        } else if code == METHOD_NOT_FOUND {
            ChainError::InvalidResponse(format!("{message} (code {code})"))
        } else {
            ChainError::Transport(format!("{message} (code {code})"))
        }
    }

    impl fmt::Debug for HttpChainClient {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("HttpChainClient")
                .field("endpoint", &self.endpoint)
                .finish_non_exhaustive()
        }
    }

    #[async_trait]
    impl ChainClient for HttpChainClient {
        async fn get_code(&self, address: Address) -> Result<Bytes, ChainError> {
            self.provider
                .get_code_at(address)
                .await
                .map_err(|e| ChainError::Transport(e.to_string()))
        }

        async fn call(&self, request: CallRequest) -> Result<Bytes, ChainError> {
            let tx = TransactionRequest::default()
                .to(request.to)
                .input(request.data.into());
            self.provider
                .call(tx)
                .await
                .map_err(|e| match e.as_error_resp() {
                    Some(payload) => rpc_error(payload.code, &payload.message),
                    None => ChainError::Transport(e.to_string()),
                })
        }

        async fn simulate(
            &self,
            calls: Vec<CallRequest>,
        ) -> Result<Vec<CallOutcome>, ChainError> {
            let expected = calls.len();
            let payload = SimulatePayload {
                block_state_calls: vec![BlockStateCall {
                    calls: calls
                        .into_iter()
                        .map(|c| SimulatedCallRequest {
                            to: c.to,
                            data: c.data,
                        })
                        .collect(),
                }],
                validation: false,
            };

            let blocks: Vec<SimulatedBlock> = self
                .provider
                .raw_request("eth_simulateV1".into(), (payload, "latest"))
                .await
                .map_err(|e| match e.as_error_resp() {
                    // A node without eth_simulateV1 answers with an error payload too
                    Some(payload) => match rpc_error(payload.code, &payload.message) {
                        ChainError::Reverted(message) => ChainError::InvalidResponse(message),
                        other => other,
                    },
                    None => ChainError::Transport(e.to_string()),
                })?;

            let block = blocks
                .into_iter()
                .next()
                .ok_or_else(|| ChainError::InvalidResponse("no simulated block".to_string()))?;
            if block.calls.len() != expected {
                return Err(ChainError::InvalidResponse(format!(
                    "expected {expected} call results, got {}",
                    block.calls.len()
                )));
            }

            Ok(block
                .calls
                .into_iter()
                .map(|c| CallOutcome {
                    success: c.status == U64::from(1),
                    return_data: c.return_data,
                })
                .collect())
        }
    }
}
