//! ERC-6492 signature wrapping and the ERC-1271 call it relies on.
//!
//! A wallet that is not deployed yet signs with its future owner key and
//! wraps the result as `abi.encode(factory, factoryCalldata, innerSig)`
//! followed by a fixed 32-byte magic suffix. The verifier deploys the wallet
//! in a simulation and then asks it through ERC-1271.

use alloy_primitives::{Address, B256, Bytes, hex};
use alloy_sol_types::{SolCall, SolType, sol, sol_data};

use super::chain::CallRequest;
use super::error::VerifyError;

/// `bytes32(uint256(keccak256("erc6492.invalid.signature")) - 1)`
pub const ERC6492_MAGIC_SUFFIX: [u8; 32] =
    hex!("6492649264926492649264926492649264926492649264926492649264926492");

/// `isValidSignature(bytes32,bytes)` selector, returned on success.
pub const ERC1271_MAGIC_VALUE: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];

sol! {
    function isValidSignature(bytes32 hash, bytes signature) external view returns (bytes4 magicValue);
}

type Erc6492Tuple = (sol_data::Address, sol_data::Bytes, sol_data::Bytes);

/// The decoded parts of an ERC-6492 wrapped signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Erc6492Signature {
    pub factory: Address,
    pub factory_calldata: Bytes,
    /// Signature to hand to `isValidSignature` once the wallet exists
    pub inner: Bytes,
}

impl Erc6492Signature {
    /// The deployment call, as the first call of a simulation batch.
    pub fn deploy_call(&self) -> CallRequest {
        CallRequest {
            to: self.factory,
            data: self.factory_calldata.clone(),
        }
    }

    /// Re-encodes the wrapped form, suffix included.
    pub fn to_bytes(&self) -> Bytes {
        let mut encoded = <Erc6492Tuple as SolType>::abi_encode_params(&(
            self.factory,
            self.factory_calldata.clone(),
            self.inner.clone(),
        ));
        encoded.extend_from_slice(&ERC6492_MAGIC_SUFFIX);
        encoded.into()
    }
}

/// Returns `true` if the signature ends with the ERC-6492 magic suffix.
pub fn is_wrapped(signature: &[u8]) -> bool {
    signature.len() > ERC6492_MAGIC_SUFFIX.len()
        && signature[signature.len() - ERC6492_MAGIC_SUFFIX.len()..] == ERC6492_MAGIC_SUFFIX
}

/// Decodes an ERC-6492 wrapper.
///
/// `Ok(None)` means the signature is not wrapped. A signature that carries
/// the suffix but whose body does not decode is malformed.
pub fn unwrap(signature: &[u8]) -> Result<Option<Erc6492Signature>, VerifyError> {
    if !is_wrapped(signature) {
        return Ok(None);
    }

    let body = &signature[..signature.len() - ERC6492_MAGIC_SUFFIX.len()];
    let (factory, factory_calldata, inner) = <Erc6492Tuple as SolType>::abi_decode_params(body)
        .map_err(|e| VerifyError::Malformed(format!("invalid ERC-6492 wrapper: {e}")))?;

    Ok(Some(Erc6492Signature {
        factory,
        factory_calldata,
        inner,
    }))
}

/// Builds the `isValidSignature(hash, signature)` call against `wallet`.
pub fn is_valid_signature_call(wallet: Address, hash: B256, signature: Bytes) -> CallRequest {
    CallRequest {
        to: wallet,
        data: isValidSignatureCall { hash, signature }.abi_encode().into(),
    }
}

/// Whether `isValidSignature` return data carries the ERC-1271 magic value.
///
/// The value is ABI-encoded as a left-aligned `bytes4` in a 32-byte word.
pub fn is_magic_value(return_data: &[u8]) -> bool {
    return_data.len() >= 4 && return_data[..4] == ERC1271_MAGIC_VALUE
}
