//! Local signer implementation.
//!
//! `RawPrivateKeyWallet` wraps an alloy provider with an embedded `EthereumWallet`
//! and submits transactions directly. Used by the provisioning CLI with the
//! deployer key from the secrets file, and against anvil in local runs.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes};
use alloy::providers::{Provider, WalletProvider};
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use async_trait::async_trait;
use tracing::info;

use crate::{Evm, EvmError, Wallet};

/// Local wallet that signs and submits transactions directly.
///
/// Wraps a provider that includes a wallet filler (e.g., built with
/// `ProviderBuilder::new().wallet(wallet).connect_http(...)`).
///
/// The wallet address is derived from the provider's default signer;
/// no separate address parameter is needed.
pub struct RawPrivateKeyWallet<P> {
    provider: P,
    required_confirmations: u64,
}

impl<P> RawPrivateKeyWallet<P> {
    /// Creates a new `RawPrivateKeyWallet` with the given provider and confirmation count.
    pub fn new(provider: P, required_confirmations: u64) -> Self {
        Self {
            provider,
            required_confirmations,
        }
    }
}

impl<P> RawPrivateKeyWallet<P>
where
    P: Provider + WalletProvider + Clone + Send + Sync,
{
    async fn submit(
        &self,
        tx: TransactionRequest,
        note: &str,
    ) -> Result<TransactionReceipt, EvmError> {
        let pending = self.provider.send_transaction(tx).await?;

        info!(tx_hash = %pending.tx_hash(), note, "Transaction submitted");

        let receipt = pending
            .with_required_confirmations(self.required_confirmations)
            .get_receipt()
            .await?;

        if !receipt.status() {
            return Err(EvmError::Reverted {
                tx_hash: receipt.transaction_hash,
            });
        }

        info!(tx_hash = %receipt.transaction_hash, note, "Transaction confirmed");

        Ok(receipt)
    }
}

#[async_trait]
impl<P> Evm for RawPrivateKeyWallet<P>
where
    P: Provider + WalletProvider + Clone + Send + Sync + 'static,
{
    type Provider = P;

    fn provider(&self) -> &P {
        &self.provider
    }
}

#[async_trait]
impl<P> Wallet for RawPrivateKeyWallet<P>
where
    P: Provider + WalletProvider + Clone + Send + Sync + 'static,
{
    fn address(&self) -> Address {
        self.provider.default_signer_address()
    }

    async fn send(
        &self,
        contract: Address,
        calldata: Bytes,
        note: &str,
    ) -> Result<TransactionReceipt, EvmError> {
        info!(%contract, note, "Submitting local contract call");

        let tx = TransactionRequest::default()
            .to(contract)
            .input(calldata.into());

        self.submit(tx, note).await
    }

    async fn deploy(&self, init_code: Bytes, note: &str) -> Result<Address, EvmError> {
        info!(note, code_len = init_code.len(), "Submitting contract creation");

        let tx = TransactionRequest::default().with_deploy_code(init_code);
        let receipt = self.submit(tx, note).await?;

        receipt
            .contract_address
            .ok_or(EvmError::MissingContractAddress {
                tx_hash: receipt.transaction_hash,
            })
    }
}
