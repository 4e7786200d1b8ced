//! MStrategy deployment and initialization.
//!
//! The strategy sits behind an upgradeable proxy administered by its own
//! proxy admin. Initialization registers exactly one vault pair with the
//! strategy and hands the admin role from the deployer to the strategy
//! admin account.

use alloy::primitives::{Address, U256};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{InputError, ProvisionError};
use crate::fixed_point::{Ratio, RatioError, encode_sqrt_bound, encode_threshold};
use crate::governance::deploy_logged;
use crate::ledger::{Contract, DeployRequest, Deployer, Ledger, ProxyOptions};
use crate::param_map;
use crate::params::{ParamMap, ParamValue};

pub const M_STRATEGY: &str = "MStrategy";
pub const M_STRATEGY_PROXY_ADMIN: &str = "MStrategyProxyAdmin";
const PROXY_ADMIN_ARTIFACT: &str = "DefaultProxyAdmin";
const PROXY_ARTIFACT: &str = "DefaultProxy";
const UNISWAP_V3_FACTORY_ABI: &str = "IUniswapV3Factory";

/// Default oracle averaging window, in seconds.
pub const DEFAULT_ORACLE_TIMESPAN: u64 = 1800;

/// Default decimal shift between the two pool tokens.
pub const DEFAULT_DECIMAL_SHIFT: u32 = 6;

const fn default_oracle_timespan() -> u64 {
    DEFAULT_ORACLE_TIMESPAN
}

const fn default_decimal_shift() -> u32 {
    DEFAULT_DECIMAL_SHIFT
}

/// A Uniswap V3 pool fee, in hundredths of a basis point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeTier(u32);

impl FeeTier {
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for FeeTier {
    type Error = InputError;

    fn try_from(fee: u32) -> Result<Self, Self::Error> {
        match fee {
            500 | 3000 | 10_000 => Ok(Self(fee)),
            other => Err(InputError::FeeTier(other)),
        }
    }
}

/// Human-readable strategy bounds, encoded into X96 words on use.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MStrategyConfig {
    pub price_min: Ratio,
    pub price_max: Ratio,
    #[serde(default = "default_decimal_shift")]
    pub decimal_shift: u32,
    pub token_rebalance_threshold: Ratio,
    pub pool_rebalance_threshold: Ratio,
    #[serde(default = "default_oracle_timespan")]
    pub oracle_price_timespan: u64,
    #[serde(default = "default_oracle_timespan")]
    pub oracle_liquidity_timespan: u64,
}

impl MStrategyConfig {
    pub fn encode(&self) -> Result<MStrategyParams, RatioError> {
        Ok(MStrategyParams {
            oracle_price_timespan: self.oracle_price_timespan,
            oracle_liquidity_timespan: self.oracle_liquidity_timespan,
            liquid_to_fixed_ratio_x96: U256::from(1u8) << 94,
            sqrt_p_min_x96: encode_sqrt_bound(self.price_min, self.decimal_shift)?,
            sqrt_p_max_x96: encode_sqrt_bound(self.price_max, self.decimal_shift)?,
            token_rebalance_threshold_x96: encode_threshold(self.token_rebalance_threshold)?,
            pool_rebalance_threshold_x96: encode_threshold(self.pool_rebalance_threshold)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MStrategyParams {
    pub oracle_price_timespan: u64,
    pub oracle_liquidity_timespan: u64,
    /// A quarter of the liquidity kept liquid, in X96.
    pub liquid_to_fixed_ratio_x96: U256,
    pub sqrt_p_min_x96: U256,
    pub sqrt_p_max_x96: U256,
    pub token_rebalance_threshold_x96: U256,
    pub pool_rebalance_threshold_x96: U256,
}

impl From<MStrategyParams> for ParamMap {
    fn from(params: MStrategyParams) -> Self {
        param_map! {
            "oraclePriceTimespan" => params.oracle_price_timespan,
            "oracleLiquidityTimespan" => params.oracle_liquidity_timespan,
            "liquidToFixedRatioX96" => params.liquid_to_fixed_ratio_x96,
            "sqrtPMinX96" => params.sqrt_p_min_x96,
            "sqrtPMaxX96" => params.sqrt_p_max_x96,
            "tokenRebalanceThresholdX96" => params.token_rebalance_threshold_x96,
            "poolRebalanceThresholdX96" => params.pool_rebalance_threshold_x96,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MStrategyImmutableParams {
    pub token0: Address,
    pub token1: Address,
    pub uni_v3_pool: Address,
    pub uni_v3_router: Address,
    pub erc20_vault: Address,
    pub money_vault: Address,
}

impl From<MStrategyImmutableParams> for ParamMap {
    fn from(params: MStrategyImmutableParams) -> Self {
        param_map! {
            "token0" => params.token0,
            "token1" => params.token1,
            "uniV3Pool" => params.uni_v3_pool,
            "uniV3Router" => params.uni_v3_router,
            "erc20Vault" => params.erc20_vault,
            "moneyVault" => params.money_vault,
        }
    }
}

/// Everything needed to register the strategy's vault pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MStrategyInit {
    pub tokens: Vec<Address>,
    pub erc20_vault: Address,
    pub money_vault: Address,
    pub fee: FeeTier,
    pub uniswap_v3_factory: Address,
    pub uniswap_v3_router: Address,
    pub config: MStrategyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MStrategyDeployment {
    pub proxy_admin: Address,
    pub strategy: Address,
    pub writes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MStrategyInitOutcome {
    /// Pool registered during this pass, if any.
    pub pool: Option<Address>,
    pub writes: usize,
}

pub struct MStrategyBootstrap<'a, L: ?Sized> {
    ledger: &'a L,
    /// Account that ends up owning the proxy admin and the admin role.
    admin: Address,
}

impl<'a, L> MStrategyBootstrap<'a, L>
where
    L: Ledger + Deployer + ?Sized,
{
    pub fn new(ledger: &'a L, admin: Address) -> Self {
        Self { ledger, admin }
    }

    async fn read(
        &self,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
    ) -> Result<ParamValue, ProvisionError> {
        self.ledger
            .read(contract, method, args)
            .await
            .map_err(ProvisionError::read(contract, method))
    }

    async fn execute(
        &self,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
    ) -> Result<(), ProvisionError> {
        self.ledger
            .execute(contract, method, args)
            .await
            .map_err(ProvisionError::write(contract, method))?;
        Ok(())
    }

    /// Deploys the proxy admin and the proxied strategy, then hands the
    /// proxy admin over to the strategy admin.
    #[tracing::instrument(skip_all, fields(admin = %self.admin), level = tracing::Level::INFO)]
    pub async fn deploy(&self) -> Result<MStrategyDeployment, ProvisionError> {
        let deployer = self.ledger.sender();
        let mut writes = 0;

        let proxy_admin = deploy_logged(
            self.ledger,
            DeployRequest::new(M_STRATEGY_PROXY_ADMIN, Vec::new()).artifact(PROXY_ADMIN_ARTIFACT),
        )
        .await?;
        writes += usize::from(proxy_admin.newly_deployed);

        let strategy = deploy_logged(
            self.ledger,
            DeployRequest::new(M_STRATEGY, Vec::new()).proxy(ProxyOptions {
                proxy_artifact: PROXY_ARTIFACT.to_owned(),
                admin: M_STRATEGY_PROXY_ADMIN.to_owned(),
                init: Some(("init".to_owned(), vec![deployer.into()])),
            }),
        )
        .await?;
        writes += usize::from(strategy.newly_deployed);

        let admin_contract = Contract::named(M_STRATEGY_PROXY_ADMIN);
        let owner = self.read(&admin_contract, "owner", &[]).await?;
        let owner = owner
            .as_address()
            .ok_or_else(|| ProvisionError::unexpected("owner", owner.clone()))?;

        if owner == self.admin {
            debug!("{M_STRATEGY_PROXY_ADMIN} already owned by {}", self.admin);
        } else {
            info!(from = %owner, to = %self.admin, "Transferring {M_STRATEGY_PROXY_ADMIN} ownership");
            self.execute(&admin_contract, "transferOwnership", &[self.admin.into()])
                .await?;
            writes += 1;
        }

        Ok(MStrategyDeployment {
            proxy_admin: proxy_admin.address,
            strategy: strategy.address,
            writes,
        })
    }

    /// Registers the vault pair once and moves the admin role off the
    /// deployer.
    #[tracing::instrument(
        skip_all,
        fields(fee = init.fee.value(), erc20_vault = %init.erc20_vault, money_vault = %init.money_vault),
        level = tracing::Level::INFO
    )]
    pub async fn init(&self, init: &MStrategyInit) -> Result<MStrategyInitOutcome, ProvisionError> {
        let &[token0, token1] = init.tokens.as_slice() else {
            return Err(InputError::TokenCount(init.tokens.len()).into());
        };
        let params = init.config.encode().map_err(InputError::from)?;

        let strategy = Contract::named(M_STRATEGY);
        let deployer = self.ledger.sender();
        let mut outcome = MStrategyInitOutcome {
            pool: None,
            writes: 0,
        };

        let count = self.read(&strategy, "vaultCount", &[]).await?;
        let count = count
            .as_uint()
            .ok_or_else(|| ProvisionError::unexpected("vaultCount", count.clone()))?;

        if count.is_zero() {
            let factory = Contract::at(UNISWAP_V3_FACTORY_ABI, init.uniswap_v3_factory);
            let pool = self
                .read(
                    &factory,
                    "getPool",
                    &[
                        token0.into(),
                        token1.into(),
                        u64::from(init.fee.value()).into(),
                    ],
                )
                .await?;
            let pool = match pool.as_address() {
                Some(address) if !address.is_zero() => address,
                _ => return Err(ProvisionError::unexpected("getPool", pool)),
            };

            let immutable_params = MStrategyImmutableParams {
                token0,
                token1,
                uni_v3_pool: pool,
                uni_v3_router: init.uniswap_v3_router,
                erc20_vault: init.erc20_vault,
                money_vault: init.money_vault,
            };

            info!(
                ?immutable_params,
                ?params,
                "Setting Strategy params"
            );
            self.execute(
                &strategy,
                "addVault",
                &[
                    ParamMap::from(immutable_params).into(),
                    ParamMap::from(params).into(),
                ],
            )
            .await?;
            outcome.pool = Some(pool);
            outcome.writes += 1;
        } else {
            debug!(%count, "{M_STRATEGY} already has vaults");
        }

        let admin_role = self.read(&strategy, "ADMIN_ROLE", &[]).await?;
        let deployer_is_admin = self.read(&strategy, "isAdmin", &[deployer.into()]).await?;
        let deployer_is_admin = deployer_is_admin
            .as_bool()
            .ok_or_else(|| ProvisionError::unexpected("isAdmin", deployer_is_admin.clone()))?;

        if deployer_is_admin {
            info!(admin = %self.admin, "Handing {M_STRATEGY} admin role over");
            self.execute(
                &strategy,
                "grantRole",
                &[admin_role.clone(), self.admin.into()],
            )
            .await?;
            outcome.writes += 1;

            self.execute(&strategy, "renounceRole", &[admin_role, deployer.into()])
                .await?;
            outcome.writes += 1;
        }

        Ok(outcome)
    }
}
