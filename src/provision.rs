//! Per-vault convergence.
//!
//! [`VaultProvisioner::provision`] drives one [`DesiredVaultSpec`] through
//! the [`VaultState`] machine:
//!
//! ```text
//! Unregistered -> Deployed -> StrategyParamsApplied
//!   -> DelayedParamsStaged -> DelayedParamsCommitted
//!   -> PerVaultParamsStaged -> PerVaultParamsCommitted
//! ```
//!
//! Every transition re-reads the ledger before deciding, so running the
//! same spec twice issues no writes the second time.

use std::fmt::{self, Display};

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{InputError, ProvisionError};
use crate::ledger::{Contract, Ledger};
use crate::params::{ParamMap, ParamValue, normalize};
use crate::reconcile::{drifted_fields, needs_update};
use crate::staged::{StagedClass, StagedParameterProtocol, StagedResult};

pub(crate) const VAULT_REGISTRY: &str = "VaultRegistry";

/// Sequential identifier assigned by the vault registry on deployment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VaultNft(pub u64);

impl VaultNft {
    pub fn next(self) -> Result<Self, InputError> {
        self.0
            .checked_add(1)
            .map(Self)
            .ok_or(InputError::NftOverflow(self))
    }
}

impl Display for VaultNft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<VaultNft> for ParamValue {
    fn from(nft: VaultNft) -> Self {
        Self::Uint(U256::from(nft.0))
    }
}

impl From<VaultNft> for U256 {
    fn from(nft: VaultNft) -> Self {
        Self::from(nft.0)
    }
}

/// Declarative target for a single vault.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesiredVaultSpec {
    /// Nft the vault must occupy; "already deployed" once the registry
    /// count moves past it.
    pub expected_nft: VaultNft,
    /// Governance contract the vault is deployed and configured through.
    pub contract: String,
    /// Passed verbatim to `deployVault`.
    #[serde(default)]
    pub deploy_options: Vec<ParamValue>,
    #[serde(default)]
    pub strategy_params: Option<ParamMap>,
    #[serde(default)]
    pub delayed_strategy_params: Option<ParamMap>,
    #[serde(default)]
    pub delayed_protocol_per_vault_params: Option<ParamMap>,
}

impl DesiredVaultSpec {
    pub fn new(expected_nft: VaultNft, contract: impl Into<String>) -> Self {
        Self {
            expected_nft,
            contract: contract.into(),
            deploy_options: Vec::new(),
            strategy_params: None,
            delayed_strategy_params: None,
            delayed_protocol_per_vault_params: None,
        }
    }

    pub fn deploy_options(mut self, options: Vec<ParamValue>) -> Self {
        self.deploy_options = options;
        self
    }

    pub fn strategy_params(mut self, params: impl Into<ParamMap>) -> Self {
        self.strategy_params = Some(params.into());
        self
    }

    pub fn delayed_strategy_params(mut self, params: impl Into<ParamMap>) -> Self {
        self.delayed_strategy_params = Some(params.into());
        self
    }

    pub fn delayed_protocol_per_vault_params(mut self, params: impl Into<ParamMap>) -> Self {
        self.delayed_protocol_per_vault_params = Some(params.into());
        self
    }

    fn display_name(&self) -> &str {
        self.contract
            .strip_suffix("Governance")
            .unwrap_or(&self.contract)
    }
}

/// Progress of a single vault through provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VaultState {
    Unregistered,
    Deployed,
    StrategyParamsApplied,
    DelayedParamsStaged,
    DelayedParamsCommitted,
    PerVaultParamsStaged,
    PerVaultParamsCommitted,
}

/// What a provisioning pass did for one vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultOutcome {
    pub nft: VaultNft,
    pub state: VaultState,
    /// Transactions issued during this pass.
    pub writes: usize,
    /// Provisioning stopped because the governance contract offers no
    /// delayed strategy params.
    pub delayed_params_unsupported: bool,
}

impl VaultOutcome {
    fn new(nft: VaultNft) -> Self {
        Self {
            nft,
            state: VaultState::Unregistered,
            writes: 0,
            delayed_params_unsupported: false,
        }
    }

    pub(crate) fn advance(&mut self, state: VaultState) {
        debug!(nft = %self.nft, from = ?self.state, to = ?state, "Vault state transition");
        self.state = state;
    }

    pub(crate) fn record_write(&mut self) {
        self.writes += 1;
    }
}

/// Converges one vault at a time against the ledger.
pub struct VaultProvisioner<'a, L: ?Sized> {
    ledger: &'a L,
}

impl<'a, L> VaultProvisioner<'a, L>
where
    L: Ledger + ?Sized,
{
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }

    #[tracing::instrument(
        skip_all,
        fields(nft = %spec.expected_nft, contract = %spec.contract),
        level = tracing::Level::INFO
    )]
    pub async fn provision(&self, spec: &DesiredVaultSpec) -> Result<VaultOutcome, ProvisionError> {
        let contract = Contract::named(&spec.contract);
        let mut outcome = VaultOutcome::new(spec.expected_nft);

        self.ensure_deployed(spec, &contract, &mut outcome).await?;
        outcome.advance(VaultState::Deployed);

        if let Some(desired) = &spec.strategy_params {
            self.apply_strategy_params(spec, &contract, desired, &mut outcome)
                .await?;
        }
        outcome.advance(VaultState::StrategyParamsApplied);

        let staged = StagedParameterProtocol::new(self.ledger);

        if let Some(desired) = &spec.delayed_strategy_params {
            let result = staged
                .converge(
                    &contract,
                    spec.expected_nft,
                    StagedClass::DelayedStrategy,
                    desired,
                    &mut outcome,
                )
                .await?;

            if result == StagedResult::Unsupported {
                info!(
                    "{} does not support delayed strategy params, nothing more to do",
                    spec.display_name()
                );
                outcome.delayed_params_unsupported = true;
                return Ok(outcome);
            }
        }
        outcome.advance(VaultState::DelayedParamsCommitted);

        if let Some(desired) = &spec.delayed_protocol_per_vault_params {
            staged
                .converge(
                    &contract,
                    spec.expected_nft,
                    StagedClass::DelayedProtocolPerVault,
                    desired,
                    &mut outcome,
                )
                .await?;
        }
        outcome.advance(VaultState::PerVaultParamsCommitted);

        Ok(outcome)
    }

    async fn ensure_deployed(
        &self,
        spec: &DesiredVaultSpec,
        contract: &Contract,
        outcome: &mut VaultOutcome,
    ) -> Result<(), ProvisionError> {
        let registry = Contract::named(VAULT_REGISTRY);
        let count = self
            .ledger
            .read(&registry, "vaultsCount", &[])
            .await
            .map_err(ProvisionError::read(&registry, "vaultsCount"))?;
        let count = count
            .as_uint()
            .ok_or_else(|| ProvisionError::unexpected("vaultsCount", count.clone()))?;

        if count > U256::from(spec.expected_nft.0) {
            info!(
                "{} with nft = {} already deployed",
                spec.display_name(),
                spec.expected_nft
            );
            return Ok(());
        }

        info!("Deploying {}...", spec.display_name());
        self.ledger
            .execute(contract, "deployVault", &spec.deploy_options)
            .await
            .map_err(ProvisionError::write(contract, "deployVault"))?;
        outcome.record_write();
        info!("Done, nft = {}", spec.expected_nft);

        Ok(())
    }

    async fn apply_strategy_params(
        &self,
        spec: &DesiredVaultSpec,
        contract: &Contract,
        desired: &ParamMap,
        outcome: &mut VaultOutcome,
    ) -> Result<(), ProvisionError> {
        let nft = ParamValue::from(spec.expected_nft);
        let current = self
            .ledger
            .read(contract, "strategyParams", std::slice::from_ref(&nft))
            .await
            .map_err(|source| ProvisionError::DriftRead {
                nft: spec.expected_nft,
                method: "strategyParams",
                source,
            })?;
        let current = normalize(&current);

        if !needs_update(desired, &current) {
            debug!("Strategy params already in sync");
            return Ok(());
        }

        info!(
            drifted = ?drifted_fields(desired, &current),
            "Setting Strategy params for {}",
            spec.contract
        );
        self.ledger
            .execute(
                contract,
                "setStrategyParams",
                &[nft, ParamValue::Struct(desired.clone())],
            )
            .await
            .map_err(ProvisionError::write(contract, "setStrategyParams"))?;
        outcome.record_write();

        Ok(())
    }
}
