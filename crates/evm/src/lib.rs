//! EVM chain interaction abstraction.
//!
//! This crate provides two traits for interacting with EVM chains:
//!
//! - [`Evm`]: read-only chain access with error-decoded view calls.
//!   Provides the underlying provider and a `call` method that
//!   classifies Solidity reverts (decoded reason vs. empty revert data).
//!
//! - [`Wallet`]: extends `Evm` with a signing identity, transaction
//!   submission and contract creation. [`RawPrivateKeyWallet`](local::RawPrivateKeyWallet)
//!   signs locally through an alloy provider carrying a wallet filler.
//!
//! Revert classification is built into both `Evm::call` (view calls) and
//! `Wallet::send` (write transactions), so consumers get human-readable
//! revert reasons without manual wiring.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionReceipt;
use async_trait::async_trait;

pub mod error_decoding;
pub mod local;

pub use error_decoding::classify_contract_error;

/// Errors that can occur during EVM operations.
#[derive(Debug, thiserror::Error)]
pub enum EvmError {
    #[error("transaction error: {0}")]
    Transaction(#[from] alloy::providers::PendingTransactionError),
    #[error("transport error: {0}")]
    Transport(#[from] alloy::transports::RpcError<alloy::transports::TransportErrorKind>),
    #[error("contract error: {0}")]
    Contract(#[from] alloy::contract::Error),
    #[error("call to {contract} reverted: {reason}")]
    Revert { contract: Address, reason: String },
    #[error("call to {contract} reverted without data")]
    EmptyRevert { contract: Address },
    #[error("transaction reverted: {tx_hash}")]
    Reverted { tx_hash: alloy::primitives::TxHash },
    #[error("contract creation {tx_hash} produced no contract address")]
    MissingContractAddress { tx_hash: alloy::primitives::TxHash },
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(#[from] alloy::signers::k256::ecdsa::Error),
}

/// Read-only EVM chain access with error-decoded view calls.
///
/// Implementations only need to supply the provider; `call` has a
/// default implementation that handles revert classification.
#[async_trait]
pub trait Evm: Send + Sync + 'static {
    /// The provider type used for chain access.
    type Provider: Provider + Clone + Send + Sync;

    /// Returns the underlying provider for direct chain queries.
    fn provider(&self) -> &Self::Provider;

    /// Execute a view call with automatic revert classification.
    ///
    /// Runs `eth_call` against the given contract and calldata. A revert
    /// without data (typically a missing function selector) is reported as
    /// [`EvmError::EmptyRevert`] so callers can tell it apart from a
    /// reasoned revert.
    async fn call(&self, contract: Address, calldata: Bytes) -> Result<Bytes, EvmError> {
        let tx = alloy::rpc::types::TransactionRequest::default()
            .to(contract)
            .input(calldata.into());

        match self.provider().call(tx).await {
            Ok(result) => Ok(result),
            Err(rpc_err) => Err(classify_contract_error(
                contract,
                alloy::contract::Error::TransportError(rpc_err),
            )),
        }
    }
}

/// Signing wallet on an EVM chain.
///
/// Extends [`Evm`] with a wallet identity (address), transaction
/// submission and contract creation. Both `send` and `deploy` wait
/// for a receipt and fail on a reverted status.
#[async_trait]
pub trait Wallet: Evm {
    /// Returns the address this wallet signs transactions from.
    fn address(&self) -> Address;

    /// Submit a signed contract call transaction.
    ///
    /// - `contract`: target contract address
    /// - `calldata`: ABI-encoded function call
    /// - `note`: human-readable operation description used for logging
    async fn send(
        &self,
        contract: Address,
        calldata: Bytes,
        note: &str,
    ) -> Result<TransactionReceipt, EvmError>;

    /// Submit a contract creation transaction and return the new address.
    ///
    /// `init_code` is the creation bytecode with ABI-encoded constructor
    /// arguments appended.
    async fn deploy(&self, init_code: Bytes, note: &str) -> Result<Address, EvmError>;
}

#[async_trait]
impl<T: Evm> Evm for Arc<T> {
    type Provider = T::Provider;

    fn provider(&self) -> &Self::Provider {
        (**self).provider()
    }

    async fn call(&self, contract: Address, calldata: Bytes) -> Result<Bytes, EvmError> {
        (**self).call(contract, calldata).await
    }
}

#[async_trait]
impl<T: Wallet> Wallet for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn send(
        &self,
        contract: Address,
        calldata: Bytes,
        note: &str,
    ) -> Result<TransactionReceipt, EvmError> {
        (**self).send(contract, calldata, note).await
    }

    async fn deploy(&self, init_code: Bytes, note: &str) -> Result<Address, EvmError> {
        (**self).deploy(init_code, note).await
    }
}
