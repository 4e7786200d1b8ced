//! Two-phase "stage, then commit" updates for delayed parameter classes.

use tracing::{debug, info};

use crate::error::ProvisionError;
use crate::ledger::{Contract, Ledger, LedgerError, ReadOutcome};
use crate::params::{ParamMap, ParamValue, normalize};
use crate::provision::{VaultNft, VaultOutcome, VaultState};
use crate::reconcile::{needs_update, sentinel_differs};

/// Field of the delayed strategy params whose value stands in for the
/// whole struct when deciding drift.
pub const DELAYED_STRATEGY_SENTINEL: &str = "strategyTreasury";

/// A parameter class that is written by staging and then committing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagedClass {
    /// Per-vault strategy params. Governance contracts without them are
    /// skipped without error.
    DelayedStrategy,
    /// Protocol params scoped to one vault.
    DelayedProtocolPerVault,
}

impl StagedClass {
    pub const fn read_method(self) -> &'static str {
        match self {
            Self::DelayedStrategy => "delayedStrategyParams",
            Self::DelayedProtocolPerVault => "delayedProtocolPerVaultParams",
        }
    }

    pub const fn stage_method(self) -> &'static str {
        match self {
            Self::DelayedStrategy => "stageDelayedStrategyParams",
            Self::DelayedProtocolPerVault => "stageDelayedProtocolPerVaultParams",
        }
    }

    pub const fn commit_method(self) -> &'static str {
        match self {
            Self::DelayedStrategy => "commitDelayedStrategyParams",
            Self::DelayedProtocolPerVault => "commitDelayedProtocolPerVaultParams",
        }
    }

    const fn states(self) -> (VaultState, VaultState) {
        match self {
            Self::DelayedStrategy => (
                VaultState::DelayedParamsStaged,
                VaultState::DelayedParamsCommitted,
            ),
            Self::DelayedProtocolPerVault => (
                VaultState::PerVaultParamsStaged,
                VaultState::PerVaultParamsCommitted,
            ),
        }
    }

    fn drifted(self, desired: &ParamMap, current: &ParamValue) -> bool {
        match self {
            // Remote structs always carry the sentinel, so a spec that leaves
            // it out is compared on the fields it does declare.
            Self::DelayedStrategy if desired.contains_key(DELAYED_STRATEGY_SENTINEL) => {
                sentinel_differs(desired, current, DELAYED_STRATEGY_SENTINEL)
            }
            Self::DelayedStrategy | Self::DelayedProtocolPerVault => {
                needs_update(desired, &normalize(current))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedResult {
    InSync,
    Committed,
    /// The contract does not offer this class at all.
    Unsupported,
}

pub struct StagedParameterProtocol<'a, L: ?Sized> {
    ledger: &'a L,
}

impl<'a, L> StagedParameterProtocol<'a, L>
where
    L: Ledger + ?Sized,
{
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }

    /// Reads the current value of `class` for `nft` and, on drift, stages
    /// `desired` and commits it immediately. No other write is issued in
    /// between.
    pub async fn converge(
        &self,
        contract: &Contract,
        nft: VaultNft,
        class: StagedClass,
        desired: &ParamMap,
        outcome: &mut VaultOutcome,
    ) -> Result<StagedResult, ProvisionError> {
        let nft_arg = ParamValue::from(nft);
        let drift_read = |source: LedgerError| ProvisionError::DriftRead {
            nft,
            method: class.read_method(),
            source,
        };

        let current = match class {
            StagedClass::DelayedStrategy => match self
                .ledger
                .read_supported(contract, class.read_method(), std::slice::from_ref(&nft_arg))
                .await
                .map_err(drift_read)?
            {
                ReadOutcome::Supported(value) => value,
                ReadOutcome::Unsupported => return Ok(StagedResult::Unsupported),
            },
            StagedClass::DelayedProtocolPerVault => self
                .ledger
                .read(contract, class.read_method(), std::slice::from_ref(&nft_arg))
                .await
                .map_err(drift_read)?,
        };

        if !class.drifted(desired, &current) {
            debug!(method = class.read_method(), "Already in sync");
            return Ok(StagedResult::InSync);
        }

        let (staged, committed) = class.states();

        info!("Staging {} for nft {nft}", class.read_method());
        self.ledger
            .execute(
                contract,
                class.stage_method(),
                &[nft_arg.clone(), ParamValue::Struct(desired.clone())],
            )
            .await
            .map_err(ProvisionError::write(contract, class.stage_method()))?;
        outcome.record_write();
        outcome.advance(staged);

        info!("Committing {} for nft {nft}", class.read_method());
        self.ledger
            .execute(contract, class.commit_method(), &[nft_arg])
            .await
            .map_err(ProvisionError::write(contract, class.commit_method()))?;
        outcome.record_write();
        outcome.advance(committed);

        Ok(StagedResult::Committed)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, address};

    use super::*;
    use crate::mock::MockLedger;
    use crate::param_map;

    const GOVERNANCE: &str = "LpIssuerGovernance";
    const TREASURY: Address = address!("0x5555555555555555555555555555555555555555");

    fn outcome() -> VaultOutcome {
        let mut outcome = VaultOutcome {
            nft: VaultNft(4),
            state: VaultState::Unregistered,
            writes: 0,
            delayed_params_unsupported: false,
        };
        outcome.advance(VaultState::StrategyParamsApplied);
        outcome
    }

    #[tokio::test]
    async fn unsupported_delayed_strategy_read_is_not_an_error() {
        let ledger = MockLedger::new();
        let mut outcome = outcome();

        let result = StagedParameterProtocol::new(&ledger)
            .converge(
                &Contract::named(GOVERNANCE),
                VaultNft(4),
                StagedClass::DelayedStrategy,
                &param_map! { "strategyTreasury" => TREASURY },
                &mut outcome,
            )
            .await
            .unwrap();

        assert_eq!(result, StagedResult::Unsupported);
        assert_eq!(outcome.writes, 0);
        assert!(ledger.writes().is_empty());
    }

    #[tokio::test]
    async fn unsupported_per_vault_read_is_a_drift_read_error() {
        let ledger = MockLedger::new();
        let mut outcome = outcome();

        let error = StagedParameterProtocol::new(&ledger)
            .converge(
                &Contract::named(GOVERNANCE),
                VaultNft(4),
                StagedClass::DelayedProtocolPerVault,
                &param_map! { "protocolFee" => 1u64 },
                &mut outcome,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            ProvisionError::DriftRead {
                method: "delayedProtocolPerVaultParams",
                source: LedgerError::Unsupported { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn transport_failure_on_delayed_read_propagates() {
        let ledger = MockLedger::new()
            .with_delayed_support(GOVERNANCE)
            .failing_read("delayedStrategyParams");
        let mut outcome = outcome();

        let error = StagedParameterProtocol::new(&ledger)
            .converge(
                &Contract::named(GOVERNANCE),
                VaultNft(4),
                StagedClass::DelayedStrategy,
                &param_map! { "strategyTreasury" => TREASURY },
                &mut outcome,
            )
            .await
            .unwrap_err();

        assert!(matches!(error, ProvisionError::DriftRead { .. }));
    }

    #[tokio::test]
    async fn drift_moves_outcome_through_staged_and_committed() {
        let ledger = MockLedger::new().with_delayed_support(GOVERNANCE);
        let mut outcome = outcome();

        let result = StagedParameterProtocol::new(&ledger)
            .converge(
                &Contract::named(GOVERNANCE),
                VaultNft(4),
                StagedClass::DelayedStrategy,
                &param_map! { "strategyTreasury" => TREASURY },
                &mut outcome,
            )
            .await
            .unwrap();

        assert_eq!(result, StagedResult::Committed);
        assert_eq!(outcome.state, VaultState::DelayedParamsCommitted);
        assert_eq!(outcome.writes, 2);
    }

    #[tokio::test]
    async fn failed_stage_skips_commit() {
        let ledger = MockLedger::new()
            .with_delayed_support(GOVERNANCE)
            .failing_write("stageDelayedStrategyParams");
        let mut outcome = outcome();

        let error = StagedParameterProtocol::new(&ledger)
            .converge(
                &Contract::named(GOVERNANCE),
                VaultNft(4),
                StagedClass::DelayedStrategy,
                &param_map! { "strategyTreasury" => TREASURY },
                &mut outcome,
            )
            .await
            .unwrap_err();

        assert!(matches!(error, ProvisionError::Write { .. }));
        assert!(ledger.writes().is_empty());
        assert_eq!(outcome.state, VaultState::StrategyParamsApplied);
    }
}
