//! Idempotent provisioning of on-chain vaults.
//!
//! Desired vault configuration is declared as data ([`DesiredVaultSpec`],
//! [`plan::Plan`]) and converged against the ledger: every step reads the
//! current state first and only writes what differs, so a run can be
//! repeated until it succeeds without duplicating work.

pub mod cli;
pub mod composite;
pub mod config;
pub mod deployments;
pub mod error;
pub mod fixed_point;
pub mod governance;
pub mod ledger;
pub mod params;
pub mod plan;
pub mod provision;
pub mod reconcile;
pub mod staged;
pub mod strategy;

#[cfg(test)]
pub(crate) mod mock;

pub use composite::{CompositeAssembler, CompositeOptions, CompositeOutcome};
pub use config::{Ctx, LogLevel, setup_tracing};
pub use error::{InputError, ProvisionError};
pub use fixed_point::{Ratio, encode_sqrt_bound, encode_threshold};
pub use ledger::{Contract, Deployer, Ledger, LedgerError, StateReader, TransactionExecutor};
pub use params::{ParamMap, ParamValue, RawStruct, normalize};
pub use provision::{DesiredVaultSpec, VaultNft, VaultOutcome, VaultProvisioner, VaultState};
pub use reconcile::needs_update;
pub use staged::{StagedClass, StagedParameterProtocol, StagedResult};
