//! Provisioning error taxonomy.
//!
//! Input errors fail before any collaborator call. Every ledger failure is
//! wrapped with the step that issued it and propagates to the caller
//! unchanged; nothing is retried.

use crate::fixed_point::RatioError;
use crate::ledger::LedgerError;
use crate::params::ParamValue;
use crate::provision::VaultNft;

/// Malformed provisioning input.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Trying to combine 0 vaults")]
    EmptyMembers,
    #[error("Vault nft {0} is declared more than once")]
    DuplicateNft(VaultNft),
    #[error("Vault nft {next} follows {previous}; specs must be in increasing nft order")]
    OutOfOrder { previous: VaultNft, next: VaultNft },
    #[error("Vault nft {0} has no successor")]
    NftOverflow(VaultNft),
    #[error("Named account {0} is not configured")]
    MissingAccount(String),
    #[error("Expected {expected} token limits, got {actual}")]
    LimitsLength { expected: usize, actual: usize },
    #[error("Expected exactly two tokens, got {0}")]
    TokenCount(usize),
    #[error("Unsupported Uniswap V3 fee tier {0}; expected 500, 3000 or 10000")]
    FeeTier(u32),
    #[error(transparent)]
    Ratio(#[from] RatioError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("Failed to read {method} for vault {nft}: {source}")]
    DriftRead {
        nft: VaultNft,
        method: &'static str,
        source: LedgerError,
    },
    #[error("Failed to read {contract}.{method}: {source}")]
    Read {
        contract: String,
        method: String,
        source: LedgerError,
    },
    #[error("{contract}.{method} failed: {source}")]
    Write {
        contract: String,
        method: String,
        source: LedgerError,
    },
    #[error("Deploying {name} failed: {source}")]
    Deploy { name: String, source: LedgerError },
    #[error("Unexpected {method} result: {value}")]
    UnexpectedValue { method: String, value: ParamValue },
}

impl ProvisionError {
    pub(crate) fn read(
        contract: &impl ToString,
        method: &str,
    ) -> impl FnOnce(LedgerError) -> Self {
        let contract = contract.to_string();
        let method = method.to_owned();
        move |source| Self::Read {
            contract,
            method,
            source,
        }
    }

    pub(crate) fn write(
        contract: &impl ToString,
        method: &str,
    ) -> impl FnOnce(LedgerError) -> Self {
        let contract = contract.to_string();
        let method = method.to_owned();
        move |source| Self::Write {
            contract,
            method,
            source,
        }
    }

    pub(crate) fn deploy(name: &str) -> impl FnOnce(LedgerError) -> Self {
        let name = name.to_owned();
        move |source| Self::Deploy { name, source }
    }

    pub(crate) fn unexpected(method: &str, value: ParamValue) -> Self {
        Self::UnexpectedValue {
            method: method.to_owned(),
            value,
        }
    }
}
