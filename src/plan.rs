//! Batch provisioning from a TOML plan.
//!
//! A plan is an ordered list of `[[vaults]]` tables, each a
//! [`DesiredVaultSpec`]. Vaults are provisioned one at a time in
//! increasing nft order.

use std::path::Path;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::error::{InputError, ProvisionError};
use crate::ledger::Ledger;
use crate::provision::{DesiredVaultSpec, VaultNft, VaultOutcome, VaultProvisioner};

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("failed to read plan: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse plan: {0}")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Input(#[from] InputError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    #[serde(default)]
    pub vaults: Vec<DesiredVaultSpec>,
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, PlanError> {
        let plan: Self = toml::from_str(contents)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Nfts are assigned sequentially by the registry, so specs must be
    /// strictly increasing.
    pub fn validate(&self) -> Result<(), InputError> {
        for pair in self.vaults.windows(2) {
            let [previous, next] = pair else { continue };
            let (previous, next) = (previous.expected_nft, next.expected_nft);

            if previous == next {
                return Err(InputError::DuplicateNft(next));
            }
            if next < previous {
                return Err(InputError::OutOfOrder { previous, next });
            }
        }

        Ok(())
    }
}

/// What to do with the remaining vaults after one fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchPolicy {
    #[default]
    AbortOnError,
    ContinueOnError,
}

#[derive(Debug)]
pub struct VaultReport {
    pub nft: VaultNft,
    pub result: Result<VaultOutcome, ProvisionError>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// One entry per attempted vault, in plan order.
    pub vaults: Vec<VaultReport>,
    /// Vaults never attempted because an earlier one failed.
    pub skipped: Vec<VaultNft>,
}

impl BatchReport {
    pub fn failures(&self) -> usize {
        self.vaults
            .iter()
            .filter(|report| report.result.is_err())
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.failures() == 0 && self.skipped.is_empty()
    }

    pub fn writes(&self) -> usize {
        self.vaults
            .iter()
            .filter_map(|report| report.result.as_ref().ok())
            .map(|outcome| outcome.writes)
            .sum()
    }
}

/// A failure before the registry assigned the nft means every later spec
/// would land on the wrong nft.
fn breaks_nft_sequence(error: &ProvisionError) -> bool {
    match error {
        ProvisionError::Write { method, .. } => method == "deployVault",
        ProvisionError::Read { method, .. } => method == "vaultsCount",
        ProvisionError::UnexpectedValue { method, .. } => method == "vaultsCount",
        _ => false,
    }
}

pub struct PlanRunner<'a, L: ?Sized> {
    ledger: &'a L,
    policy: BatchPolicy,
}

impl<'a, L> PlanRunner<'a, L>
where
    L: Ledger + ?Sized,
{
    pub fn new(ledger: &'a L, policy: BatchPolicy) -> Self {
        Self { ledger, policy }
    }

    /// Provisions every vault of `plan`. Already committed state of
    /// earlier vaults stays valid when a later one fails.
    #[tracing::instrument(
        skip_all,
        fields(vaults = plan.vaults.len(), policy = ?self.policy),
        level = tracing::Level::INFO
    )]
    pub async fn run(&self, plan: &Plan) -> Result<BatchReport, InputError> {
        plan.validate()?;

        let provisioner = VaultProvisioner::new(self.ledger);
        let mut report = BatchReport::default();
        let mut remaining = plan.vaults.iter();

        while let Some(spec) = remaining.next() {
            let result = provisioner.provision(spec).await;

            let stop = match &result {
                Ok(outcome) => {
                    info!(nft = %outcome.nft, writes = outcome.writes, "Vault provisioned");
                    false
                }
                Err(error) => {
                    error!(nft = %spec.expected_nft, %error, "Vault provisioning failed");
                    self.policy == BatchPolicy::AbortOnError || breaks_nft_sequence(error)
                }
            };

            report.vaults.push(VaultReport {
                nft: spec.expected_nft,
                result,
            });

            if stop {
                report.skipped = remaining.by_ref().map(|spec| spec.expected_nft).collect();
                if !report.skipped.is_empty() {
                    warn!(skipped = report.skipped.len(), "Skipping remaining vaults");
                }
                break;
            }
        }

        Ok(report)
    }
}
