//! Collaborator boundary towards the remote ledger.
//!
//! The provisioning core only talks to the chain through these traits:
//! [`StateReader`] for view calls, [`TransactionExecutor`] for signed
//! writes and [`Deployer`] for contract creation. The EVM-backed
//! implementation lives in [`crate::deployments`]; tests use
//! `crate::mock::MockLedger`.

use std::fmt::{self, Display};

use alloy::primitives::{Address, TxHash};
use async_trait::async_trait;
use st0x_evm::EvmError;

use crate::params::ParamValue;

/// Target of a read or write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contract {
    /// A deployment recorded under this name.
    Named(String),
    /// An artifact ABI addressed at an explicit location.
    At { abi: String, address: Address },
}

impl Contract {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn at(abi: impl Into<String>, address: Address) -> Self {
        Self::At {
            abi: abi.into(),
            address,
        }
    }
}

impl Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::At { abi, address } => write!(f, "{abi}@{address}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{contract} does not support {method}")]
    Unsupported { contract: String, method: String },
    #[error("no deployment named {0}")]
    UnknownContract(String),
    #[error("no artifact named {0}")]
    UnknownArtifact(String),
    #[error("{contract}.{method}: {reason}")]
    Encoding {
        contract: String,
        method: String,
        reason: String,
    },
    #[error("{contract}.{method} reverted: {reason}")]
    Reverted {
        contract: String,
        method: String,
        reason: String,
    },
    #[error(transparent)]
    Evm(#[from] EvmError),
    #[error("deployment store error: {0}")]
    Store(#[from] crate::deployments::DeploymentStoreError),
}

/// Typed result of a read against a method that older contract
/// implementations may not offer.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Supported(ParamValue),
    Unsupported,
}

/// Read-only queries against current ledger state.
#[async_trait]
pub trait StateReader: Send + Sync {
    async fn read(
        &self,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
    ) -> Result<ParamValue, LedgerError>;

    /// Like [`read`](Self::read), but reports "method not offered" as
    /// [`ReadOutcome::Unsupported`] instead of an error. Every other
    /// failure still propagates.
    async fn read_supported(
        &self,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
    ) -> Result<ReadOutcome, LedgerError> {
        match self.read(contract, method, args).await {
            Ok(value) => Ok(ReadOutcome::Supported(value)),
            Err(LedgerError::Unsupported { .. }) => Ok(ReadOutcome::Unsupported),
            Err(error) => Err(error),
        }
    }
}

/// Signed, state-changing calls from the operating account.
#[async_trait]
pub trait TransactionExecutor: Send + Sync {
    /// The account every transaction is signed by.
    fn sender(&self) -> Address;

    async fn execute(
        &self,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
    ) -> Result<TxHash, LedgerError>;
}

/// Deploy through a proxy contract instead of directly.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyOptions {
    /// Artifact of the proxy contract, constructed with
    /// `(implementation, admin, initCalldata)`.
    pub proxy_artifact: String,
    /// Deployment name of the proxy admin contract.
    pub admin: String,
    /// Initializer invoked through the proxy constructor.
    pub init: Option<(String, Vec<ParamValue>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployRequest {
    /// Logical deployment name, the idempotency key.
    pub name: String,
    /// Artifact to deploy; defaults to `name`.
    pub artifact: Option<String>,
    pub args: Vec<ParamValue>,
    pub proxy: Option<ProxyOptions>,
}

impl DeployRequest {
    pub fn new(name: impl Into<String>, args: Vec<ParamValue>) -> Self {
        Self {
            name: name.into(),
            artifact: None,
            args,
            proxy: None,
        }
    }

    pub fn artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    pub fn proxy(mut self, proxy: ProxyOptions) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn artifact_name(&self) -> &str {
        self.artifact.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
    pub address: Address,
    /// `false` when an identical deployment already existed.
    pub newly_deployed: bool,
}

/// Contract creation, idempotent per logical deployment name: an
/// unchanged request returns the existing address without a transaction.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, request: &DeployRequest) -> Result<Deployment, LedgerError>;

    /// Address of an existing named deployment.
    async fn address_of(&self, name: &str) -> Result<Address, LedgerError>;
}

/// Everything the provisioning routines need from the chain.
pub trait Ledger: StateReader + TransactionExecutor {}

impl<T: StateReader + TransactionExecutor> Ledger for T {}

