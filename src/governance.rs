//! One-off deployments the vault governances depend on: the LP issuer
//! governance with its factory, and the Uniswap V3 oracle.

use alloy::primitives::Address;
use tracing::{debug, info};

use crate::composite::LP_ISSUER_GOVERNANCE;
use crate::error::ProvisionError;
use crate::ledger::{Contract, DeployRequest, Deployer, Deployment, Ledger};
use crate::param_map;
use crate::params::ParamValue;
use crate::provision::VAULT_REGISTRY;

pub const PROTOCOL_GOVERNANCE: &str = "ProtocolGovernance";
pub const LP_ISSUER_FACTORY: &str = "LpIssuerFactory";
pub const UNI_V3_ORACLE: &str = "UniV3Oracle";

/// One day, in seconds.
pub const MANAGEMENT_FEE_CHARGE_DELAY: u64 = 86_400;

/// Number of pool observations the oracle averages over.
pub const ORACLE_OBSERVATIONS_FOR_AVERAGE: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LpIssuerSetup {
    pub governance: Address,
    pub factory: Address,
    /// Transactions issued, deployments included.
    pub writes: usize,
}

/// Deploys `request`, logging whether the deployment is new or reused.
pub(crate) async fn deploy_logged<L>(
    ledger: &L,
    request: DeployRequest,
) -> Result<Deployment, ProvisionError>
where
    L: Deployer + ?Sized,
{
    let deployment = ledger
        .deploy(&request)
        .await
        .map_err(ProvisionError::deploy(&request.name))?;

    if deployment.newly_deployed {
        info!(address = %deployment.address, "Deployed {}", request.name);
    } else {
        debug!(address = %deployment.address, "Reusing {}", request.name);
    }

    Ok(deployment)
}

pub struct GovernanceBootstrap<'a, L: ?Sized> {
    ledger: &'a L,
}

impl<'a, L> GovernanceBootstrap<'a, L>
where
    L: Ledger + Deployer + ?Sized,
{
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }

    async fn read_bool(
        &self,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
    ) -> Result<bool, ProvisionError> {
        let value = self
            .ledger
            .read(contract, method, args)
            .await
            .map_err(ProvisionError::read(contract, method))?;

        value
            .as_bool()
            .ok_or_else(|| ProvisionError::unexpected(method, value.clone()))
    }

    /// Deploys the LP issuer governance and its factory, initializes the
    /// governance with the factory and lets it move registry nfts on the
    /// deployer's behalf. Each step is skipped once done.
    #[tracing::instrument(skip_all, level = tracing::Level::INFO)]
    pub async fn setup_lp_issuer_governance(&self) -> Result<LpIssuerSetup, ProvisionError> {
        let dependency = |name: &'static str| async move {
            self.ledger
                .address_of(name)
                .await
                .map_err(ProvisionError::deploy(LP_ISSUER_GOVERNANCE))
        };
        let protocol_governance = dependency(PROTOCOL_GOVERNANCE).await?;
        let registry = dependency(VAULT_REGISTRY).await?;
        let mut writes = 0;

        let governance = deploy_logged(
            self.ledger,
            DeployRequest::new(
                LP_ISSUER_GOVERNANCE,
                vec![
                    param_map! {
                        "protocolGovernance" => protocol_governance,
                        "registry" => registry,
                    }
                    .into(),
                    param_map! { "managementFeeChargeDelay" => MANAGEMENT_FEE_CHARGE_DELAY }.into(),
                ],
            ),
        )
        .await?;
        writes += usize::from(governance.newly_deployed);

        let factory = deploy_logged(
            self.ledger,
            DeployRequest::new(LP_ISSUER_FACTORY, vec![governance.address.into()]),
        )
        .await?;
        writes += usize::from(factory.newly_deployed);

        let governance_contract = Contract::named(LP_ISSUER_GOVERNANCE);
        if !self
            .read_bool(&governance_contract, "initialized", &[])
            .await?
        {
            info!("Initializing factory...");
            self.ledger
                .execute(&governance_contract, "initialize", &[factory.address.into()])
                .await
                .map_err(ProvisionError::write(&governance_contract, "initialize"))?;
            writes += 1;
        }

        let registry_contract = Contract::named(VAULT_REGISTRY);
        let approved = self
            .read_bool(
                &registry_contract,
                "isApprovedForAll",
                &[self.ledger.sender().into(), governance.address.into()],
            )
            .await?;
        if !approved {
            info!("Approving lp issuer governance");
            self.ledger
                .execute(
                    &registry_contract,
                    "setApprovalForAll",
                    &[governance.address.into(), true.into()],
                )
                .await
                .map_err(ProvisionError::write(&registry_contract, "setApprovalForAll"))?;
            writes += 1;
        }

        Ok(LpIssuerSetup {
            governance: governance.address,
            factory: factory.address,
            writes,
        })
    }

    #[tracing::instrument(skip_all, fields(%uniswap_v3_factory, %admin), level = tracing::Level::INFO)]
    pub async fn deploy_oracle(
        &self,
        uniswap_v3_factory: Address,
        admin: Address,
    ) -> Result<Deployment, ProvisionError> {
        deploy_logged(
            self.ledger,
            DeployRequest::new(
                UNI_V3_ORACLE,
                vec![
                    uniswap_v3_factory.into(),
                    ORACLE_OBSERVATIONS_FOR_AVERAGE.into(),
                    admin.into(),
                ],
            ),
        )
        .await
    }
}
