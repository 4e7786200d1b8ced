//! Links member vaults into an aggregation vault plus an LP issuance vault.
//!
//! The gateway vault (nft `N`) redirects into the member vaults, the LP
//! issuer vault (nft `N + 1`) issues shares against it. Once both are
//! provisioned, the registry entry of the issuer is handed over from the
//! deployer to the issuer vault itself. That transfer is unconditional:
//! after it succeeds, the deployer no longer owns the entry and assembling
//! the same pair again fails at that step.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolValue;
use serde::Deserialize;
use tracing::info;

use crate::error::{InputError, ProvisionError};
use crate::ledger::{Contract, Ledger};
use crate::params::{ParamMap, ParamValue};
use crate::provision::{
    DesiredVaultSpec, VAULT_REGISTRY, VaultNft, VaultOutcome, VaultProvisioner,
};

pub const GATEWAY_GOVERNANCE: &str = "GatewayVaultGovernance";
pub const LP_ISSUER_GOVERNANCE: &str = "LpIssuerGovernance";

pub const LP_TOKEN_NAME: &str = "MStrategy LP Token";
pub const LP_TOKEN_SYMBOL: &str = "MSLP";

/// 2% in 1e9 fixed point.
pub const DEFAULT_MANAGEMENT_FEE: u64 = 2_000_000_000;
/// 20% in 1e9 fixed point.
pub const DEFAULT_PERFORMANCE_FEE: u64 = 20_000_000_000;

const SAFE_TRANSFER_FROM: &str = "safeTransferFrom(address,address,uint256)";

/// Optional overrides; unset fields take their defaults in
/// [`CompositeOptions::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompositeOptions {
    /// Per-token deposit limits of the gateway vault.
    pub limits: Option<Vec<U256>>,
    pub strategy_performance_treasury: Option<Address>,
    pub token_limit_per_address: Option<U256>,
    pub management_fee: Option<U256>,
    pub performance_fee: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCompositeOptions {
    pub limits: Vec<U256>,
    pub strategy_performance_treasury: Address,
    pub token_limit_per_address: U256,
    pub management_fee: U256,
    pub performance_fee: U256,
}

impl CompositeOptions {
    pub fn resolve(
        &self,
        token_count: usize,
        strategy_treasury: Address,
    ) -> Result<ResolvedCompositeOptions, InputError> {
        let limits = match &self.limits {
            Some(limits) if limits.len() != token_count => {
                return Err(InputError::LimitsLength {
                    expected: token_count,
                    actual: limits.len(),
                });
            }
            Some(limits) => limits.clone(),
            None => vec![U256::MAX; token_count],
        };

        Ok(ResolvedCompositeOptions {
            limits,
            strategy_performance_treasury: self
                .strategy_performance_treasury
                .unwrap_or(strategy_treasury),
            token_limit_per_address: self.token_limit_per_address.unwrap_or(U256::MAX),
            management_fee: self
                .management_fee
                .unwrap_or(U256::from(DEFAULT_MANAGEMENT_FEE)),
            performance_fee: self
                .performance_fee
                .unwrap_or(U256::from(DEFAULT_PERFORMANCE_FEE)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayStrategyParams {
    pub limits: Vec<U256>,
}

impl From<GatewayStrategyParams> for ParamMap {
    fn from(params: GatewayStrategyParams) -> Self {
        crate::param_map! { "limits" => params.limits }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayDelayedStrategyParams {
    pub strategy_treasury: Address,
    pub redirects: Vec<VaultNft>,
}

impl From<GatewayDelayedStrategyParams> for ParamMap {
    fn from(params: GatewayDelayedStrategyParams) -> Self {
        crate::param_map! {
            "strategyTreasury" => params.strategy_treasury,
            "redirects" => params.redirects,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LpIssuerStrategyParams {
    pub token_limit_per_address: U256,
}

impl From<LpIssuerStrategyParams> for ParamMap {
    fn from(params: LpIssuerStrategyParams) -> Self {
        crate::param_map! { "tokenLimitPerAddress" => params.token_limit_per_address }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LpIssuerDelayedStrategyParams {
    pub strategy_treasury: Address,
    pub strategy_performance_treasury: Address,
    pub management_fee: U256,
    pub performance_fee: U256,
}

impl From<LpIssuerDelayedStrategyParams> for ParamMap {
    fn from(params: LpIssuerDelayedStrategyParams) -> Self {
        crate::param_map! {
            "strategyTreasury" => params.strategy_treasury,
            "strategyPerformanceTreasury" => params.strategy_performance_treasury,
            "managementFee" => params.management_fee,
            "performanceFee" => params.performance_fee,
        }
    }
}

/// `abi.encode(uint256[] redirects)`
fn encode_redirects(members: &[VaultNft]) -> Bytes {
    let nfts: Vec<U256> = members.iter().map(|nft| U256::from(nft.0)).collect();
    (nfts,).abi_encode_params().into()
}

/// `abi.encode(uint256 nft, string name, string symbol)`
fn encode_lp_token(nft: VaultNft) -> Bytes {
    (
        U256::from(nft.0),
        LP_TOKEN_NAME.to_owned(),
        LP_TOKEN_SYMBOL.to_owned(),
    )
        .abi_encode_params()
        .into()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeOutcome {
    pub tokens: Vec<Address>,
    pub gateway: VaultOutcome,
    pub lp_issuer: VaultOutcome,
    pub lp_issuer_address: Address,
}

pub struct CompositeAssembler<'a, L: ?Sized> {
    ledger: &'a L,
}

impl<'a, L> CompositeAssembler<'a, L>
where
    L: Ledger + ?Sized,
{
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }

    #[tracing::instrument(skip_all, fields(nft = %expected_nft), level = tracing::Level::INFO)]
    pub async fn assemble(
        &self,
        expected_nft: VaultNft,
        members: &[VaultNft],
        strategy: Address,
        strategy_treasury: Address,
        options: &CompositeOptions,
    ) -> Result<CompositeOutcome, ProvisionError> {
        let Some(first) = members.first() else {
            return Err(InputError::EmptyMembers.into());
        };
        let issuer_nft = expected_nft.next()?;

        let tokens = self.vault_tokens(*first).await?;
        info!(?tokens, "Combining vaults {members:?}");
        let resolved = options.resolve(tokens.len(), strategy_treasury)?;
        let token_list = ParamValue::from(tokens.clone());

        let gateway = DesiredVaultSpec::new(expected_nft, GATEWAY_GOVERNANCE)
            .deploy_options(vec![
                token_list.clone(),
                encode_redirects(members).into(),
                strategy.into(),
            ])
            .delayed_strategy_params(GatewayDelayedStrategyParams {
                strategy_treasury,
                redirects: members.to_vec(),
            })
            .strategy_params(GatewayStrategyParams {
                limits: resolved.limits.clone(),
            });

        let lp_issuer = DesiredVaultSpec::new(issuer_nft, LP_ISSUER_GOVERNANCE)
            .deploy_options(vec![
                token_list,
                encode_lp_token(expected_nft).into(),
                self.ledger.sender().into(),
            ])
            .delayed_strategy_params(LpIssuerDelayedStrategyParams {
                strategy_treasury,
                strategy_performance_treasury: resolved.strategy_performance_treasury,
                management_fee: resolved.management_fee,
                performance_fee: resolved.performance_fee,
            })
            .strategy_params(LpIssuerStrategyParams {
                token_limit_per_address: resolved.token_limit_per_address,
            });

        let provisioner = VaultProvisioner::new(self.ledger);
        let gateway = provisioner.provision(&gateway).await?;
        let lp_issuer = provisioner.provision(&lp_issuer).await?;

        let lp_issuer_address = self.vault_address(issuer_nft).await?;
        self.transfer_to_issuer(issuer_nft, lp_issuer_address).await?;

        Ok(CompositeOutcome {
            tokens,
            gateway,
            lp_issuer,
            lp_issuer_address,
        })
    }

    async fn vault_address(&self, nft: VaultNft) -> Result<Address, ProvisionError> {
        let registry = Contract::named(VAULT_REGISTRY);
        let address = self
            .ledger
            .read(&registry, "vaultForNft", &[nft.into()])
            .await
            .map_err(ProvisionError::read(&registry, "vaultForNft"))?;

        address
            .as_address()
            .ok_or_else(|| ProvisionError::unexpected("vaultForNft", address.clone()))
    }

    async fn vault_tokens(&self, nft: VaultNft) -> Result<Vec<Address>, ProvisionError> {
        let vault = Contract::at("IVault", self.vault_address(nft).await?);
        let tokens = self
            .ledger
            .read(&vault, "vaultTokens", &[])
            .await
            .map_err(ProvisionError::read(&vault, "vaultTokens"))?;

        tokens
            .as_list()
            .and_then(|tokens| tokens.iter().map(ParamValue::as_address).collect())
            .ok_or_else(|| ProvisionError::unexpected("vaultTokens", tokens.clone()))
    }

    async fn transfer_to_issuer(
        &self,
        issuer_nft: VaultNft,
        lp_issuer: Address,
    ) -> Result<(), ProvisionError> {
        let registry = Contract::named(VAULT_REGISTRY);
        let deployer = self.ledger.sender();

        info!(%deployer, %lp_issuer, "Transferring ownership of nft {issuer_nft} to the LP issuer");
        self.ledger
            .execute(
                &registry,
                SAFE_TRANSFER_FROM,
                &[deployer.into(), lp_issuer.into(), issuer_nft.into()],
            )
            .await
            .map_err(ProvisionError::write(&registry, SAFE_TRANSFER_FROM))?;

        Ok(())
    }
}
