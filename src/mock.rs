//! In-memory ledger for exercising provisioning without a chain.
//!
//! Models just enough contract behaviour for convergence to be observable:
//! the registry count and ownership, strategy params, staged/committed
//! delayed params, a handful of role and ownership setters and named
//! deployments. Every successful write is recorded in order.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use alloy::primitives::{Address, TxHash, U256, address};
use async_trait::async_trait;

use crate::ledger::{
    Contract, DeployRequest, Deployer, Deployment, LedgerError, StateReader, TransactionExecutor,
};
use crate::params::{ParamMap, ParamValue, RawStruct, normalize};
use crate::provision::VaultNft;
use crate::staged::StagedClass;

/// A successful `execute` call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WriteRecord {
    pub(crate) contract: String,
    pub(crate) method: String,
    pub(crate) args: Vec<ParamValue>,
}

impl WriteRecord {
    pub(crate) fn new(contract: &str, method: &str, args: Vec<ParamValue>) -> Self {
        Self {
            contract: contract.to_owned(),
            method: method.to_owned(),
            args,
        }
    }
}

type VaultKey = (String, u64);
type ViewKey = (String, String, String);

#[derive(Default)]
struct State {
    vaults_count: u64,
    vault_owners: HashMap<u64, Address>,
    vault_tokens: HashMap<u64, Vec<Address>>,
    strategy_params: HashMap<VaultKey, ParamMap>,
    committed: HashMap<(String, u64, StagedClass), ParamMap>,
    pending: HashMap<(String, u64, StagedClass), ParamMap>,
    supports: HashSet<(String, StagedClass)>,
    views: HashMap<ViewKey, ParamValue>,
    deployments: HashMap<String, (Address, DeployRequest)>,
    deployed: Vec<String>,
    writes: Vec<WriteRecord>,
    calls: usize,
    failing_reads: HashSet<String>,
    failing_writes: HashSet<String>,
    failing_deploys: HashSet<String>,
}

pub(crate) struct MockLedger {
    state: Mutex<State>,
}

fn view_key(contract: &Contract, method: &str, args: &[ParamValue]) -> ViewKey {
    let args = args
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    (contract.to_string(), method.to_owned(), args)
}

fn blob(map: &ParamMap) -> ParamValue {
    ParamValue::Raw(RawStruct::from_fields(
        map.iter()
            .map(|(key, value)| (Some(key.clone()), value.clone())),
    ))
}

fn staged_class(method: &str) -> Option<(StagedClass, bool)> {
    [StagedClass::DelayedStrategy, StagedClass::DelayedProtocolPerVault]
        .into_iter()
        .find_map(|class| {
            if method == class.stage_method() {
                Some((class, true))
            } else if method == class.commit_method() {
                Some((class, false))
            } else {
                None
            }
        })
}

fn reverted(contract: &Contract, method: &str, reason: &str) -> LedgerError {
    LedgerError::Reverted {
        contract: contract.to_string(),
        method: method.to_owned(),
        reason: reason.to_owned(),
    }
}

fn nft_arg(contract: &Contract, method: &str, args: &[ParamValue]) -> Result<u64, LedgerError> {
    args.first()
        .and_then(ParamValue::as_uint)
        .and_then(|nft| u64::try_from(nft).ok())
        .ok_or_else(|| reverted(contract, method, "missing nft argument"))
}

impl MockLedger {
    pub(crate) const DEPLOYER: Address = address!("0xde00000000000000000000000000000000000001");

    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Address the registry reports for `nft`.
    pub(crate) fn vault_address(nft: u64) -> Address {
        let mut bytes = [0u8; 20];
        bytes[0] = 0xaa;
        bytes[12..].copy_from_slice(&nft.to_be_bytes());
        Address::from(bytes)
    }

    fn deployment_address(index: usize) -> Address {
        let mut bytes = [0u8; 20];
        bytes[0] = 0xdd;
        bytes[12..].copy_from_slice(&(index as u64).to_be_bytes());
        Address::from(bytes)
    }

    fn update(self, apply: impl FnOnce(&mut State)) -> Self {
        apply(&mut self.state.lock().unwrap());
        self
    }

    /// Registry count; every nft below it is registered and owned by
    /// [`Self::DEPLOYER`].
    pub(crate) fn with_vaults_count(self, count: u64) -> Self {
        self.update(|state| {
            state.vaults_count = count;
            for nft in 0..count {
                state.vault_owners.entry(nft).or_insert(Self::DEPLOYER);
            }
        })
    }

    pub(crate) fn with_vault_tokens(self, nft: u64, tokens: Vec<Address>) -> Self {
        self.update(|state| {
            state.vault_tokens.insert(nft, tokens);
        })
    }

    pub(crate) fn with_vault_owner(self, nft: u64, owner: Address) -> Self {
        self.update(|state| {
            state.vault_owners.insert(nft, owner);
        })
    }

    /// Makes both delayed parameter classes readable on `contract`.
    pub(crate) fn with_delayed_support(self, contract: &str) -> Self {
        self.update(|state| {
            state
                .supports
                .insert((contract.to_owned(), StagedClass::DelayedStrategy));
            state
                .supports
                .insert((contract.to_owned(), StagedClass::DelayedProtocolPerVault));
        })
    }

    pub(crate) fn with_strategy_params(self, contract: &str, nft: VaultNft, params: ParamMap) -> Self {
        self.update(|state| {
            state
                .strategy_params
                .insert((contract.to_owned(), nft.0), params);
        })
    }

    pub(crate) fn with_delayed_strategy_params(
        self,
        contract: &str,
        nft: VaultNft,
        params: ParamMap,
    ) -> Self {
        self.with_committed(contract, nft, StagedClass::DelayedStrategy, params)
    }

    pub(crate) fn with_per_vault_params(self, contract: &str, nft: VaultNft, params: ParamMap) -> Self {
        self.with_committed(contract, nft, StagedClass::DelayedProtocolPerVault, params)
    }

    fn with_committed(
        self,
        contract: &str,
        nft: VaultNft,
        class: StagedClass,
        params: ParamMap,
    ) -> Self {
        self.update(|state| {
            state.supports.insert((contract.to_owned(), class));
            state
                .committed
                .insert((contract.to_owned(), nft.0, class), params);
        })
    }

    /// Result of any read not modelled explicitly.
    pub(crate) fn with_view(
        self,
        contract: &Contract,
        method: &str,
        args: Vec<ParamValue>,
        value: impl Into<ParamValue>,
    ) -> Self {
        let key = view_key(contract, method, &args);
        let value = value.into();
        self.update(|state| {
            state.views.insert(key, value);
        })
    }

    pub(crate) fn with_deployment(self, name: &str, address: Address) -> Self {
        self.update(|state| {
            state.deployments.insert(
                name.to_owned(),
                (address, DeployRequest::new(name, Vec::new())),
            );
        })
    }

    pub(crate) fn failing_read(self, method: &str) -> Self {
        self.update(|state| {
            state.failing_reads.insert(method.to_owned());
        })
    }

    pub(crate) fn failing_write(self, method: &str) -> Self {
        self.update(|state| {
            state.failing_writes.insert(method.to_owned());
        })
    }

    pub(crate) fn failing_deploy(self, name: &str) -> Self {
        self.update(|state| {
            state.failing_deploys.insert(name.to_owned());
        })
    }

    pub(crate) fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_reads.clear();
        state.failing_writes.clear();
        state.failing_deploys.clear();
    }

    pub(crate) fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().unwrap().writes.clone()
    }

    pub(crate) fn write_methods(&self) -> Vec<String> {
        self.writes()
            .into_iter()
            .map(|write| write.method)
            .collect()
    }

    /// Names of the contracts actually deployed, in order.
    pub(crate) fn deployed(&self) -> Vec<String> {
        self.state.lock().unwrap().deployed.clone()
    }

    /// Total number of reads, writes and deploys attempted.
    pub(crate) fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub(crate) fn vault_owner(&self, nft: u64) -> Option<Address> {
        self.state.lock().unwrap().vault_owners.get(&nft).copied()
    }

    pub(crate) fn view(&self, contract: &Contract, method: &str, args: &[ParamValue]) -> Option<ParamValue> {
        self.state
            .lock()
            .unwrap()
            .views
            .get(&view_key(contract, method, args))
            .cloned()
    }
}

impl State {
    fn staged_read(
        &self,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
        class: StagedClass,
    ) -> Result<ParamValue, LedgerError> {
        let name = contract.to_string();
        if !self.supports.contains(&(name.clone(), class)) {
            return Err(LedgerError::Unsupported {
                contract: name,
                method: method.to_owned(),
            });
        }

        let nft = nft_arg(contract, method, args)?;
        Ok(self
            .committed
            .get(&(name, nft, class))
            .map_or_else(|| ParamValue::Raw(RawStruct::new()), blob))
    }

    fn read(
        &self,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
    ) -> Result<ParamValue, LedgerError> {
        match method {
            "vaultsCount" => Ok(U256::from(self.vaults_count).into()),
            "vaultForNft" => {
                let nft = nft_arg(contract, method, args)?;
                Ok(if nft < self.vaults_count {
                    MockLedger::vault_address(nft).into()
                } else {
                    Address::ZERO.into()
                })
            }
            "ownerOf" => {
                let nft = nft_arg(contract, method, args)?;
                self.vault_owners
                    .get(&nft)
                    .map(|owner| ParamValue::from(*owner))
                    .ok_or_else(|| reverted(contract, method, "ERC721: invalid token ID"))
            }
            "vaultTokens" => {
                let Contract::At { address, .. } = contract else {
                    return Err(reverted(contract, method, "vaultTokens needs an address"));
                };
                let tokens = self
                    .vault_tokens
                    .iter()
                    .find(|(nft, _)| MockLedger::vault_address(**nft) == *address)
                    .map(|(_, tokens)| tokens.clone())
                    .unwrap_or_default();
                Ok(tokens.into())
            }
            "strategyParams" => {
                let nft = nft_arg(contract, method, args)?;
                Ok(self
                    .strategy_params
                    .get(&(contract.to_string(), nft))
                    .map_or_else(|| ParamValue::Raw(RawStruct::new()), blob))
            }
            "delayedStrategyParams" => {
                self.staged_read(contract, method, args, StagedClass::DelayedStrategy)
            }
            "delayedProtocolPerVaultParams" => {
                self.staged_read(contract, method, args, StagedClass::DelayedProtocolPerVault)
            }
            _ => self
                .views
                .get(&view_key(contract, method, args))
                .cloned()
                .ok_or_else(|| LedgerError::Unsupported {
                    contract: contract.to_string(),
                    method: method.to_owned(),
                }),
        }
    }

    fn set_view(
        &mut self,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
        value: ParamValue,
    ) {
        self.views.insert(view_key(contract, method, args), value);
    }

    fn apply(
        &mut self,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
    ) -> Result<(), LedgerError> {
        let name = contract.to_string();

        if let Some((class, staging)) = staged_class(method) {
            let nft = nft_arg(contract, method, args)?;
            let key = (name, nft, class);
            if staging {
                let params = args.get(1).map(normalize).unwrap_or_default();
                self.pending.insert(key, params);
            } else {
                let params = self
                    .pending
                    .remove(&key)
                    .ok_or_else(|| reverted(contract, method, "nothing staged"))?;
                // Fields the stage left out keep their committed value.
                self.committed.entry(key).or_default().extend(params);
            }
            return Ok(());
        }

        match method {
            "deployVault" => {
                let nft = self.vaults_count;
                self.vaults_count += 1;
                self.vault_owners.insert(nft, MockLedger::DEPLOYER);
            }
            "setStrategyParams" => {
                let nft = nft_arg(contract, method, args)?;
                let params = args.get(1).map(normalize).unwrap_or_default();
                self.strategy_params.insert((name, nft), params);
            }
            "safeTransferFrom(address,address,uint256)" | "safeTransferFrom" => {
                let from = args.first().and_then(ParamValue::as_address);
                let to = args.get(1).and_then(ParamValue::as_address);
                let nft = args
                    .get(2)
                    .and_then(ParamValue::as_uint)
                    .and_then(|nft| u64::try_from(nft).ok());
                let (Some(from), Some(to), Some(nft)) = (from, to, nft) else {
                    return Err(reverted(contract, method, "bad arguments"));
                };
                if self.vault_owners.get(&nft) != Some(&from) {
                    return Err(reverted(
                        contract,
                        method,
                        "ERC721: transfer caller is not owner nor approved",
                    ));
                }
                self.vault_owners.insert(nft, to);
            }
            "setApprovalForAll" => {
                let operator = args.first().cloned().unwrap_or(ParamValue::Bool(false));
                let approved = args.get(1).cloned().unwrap_or(ParamValue::Bool(false));
                self.set_view(
                    contract,
                    "isApprovedForAll",
                    &[MockLedger::DEPLOYER.into(), operator],
                    approved,
                );
            }
            "initialize" => self.set_view(contract, "initialized", &[], true.into()),
            "addVault" => {
                let count = self
                    .views
                    .get(&view_key(contract, "vaultCount", &[]))
                    .and_then(ParamValue::as_uint)
                    .unwrap_or_default();
                self.set_view(contract, "vaultCount", &[], (count + U256::from(1)).into());
            }
            "grantRole" | "renounceRole" => {
                let account = args.get(1).cloned().unwrap_or(ParamValue::Bool(false));
                self.set_view(
                    contract,
                    "isAdmin",
                    std::slice::from_ref(&account),
                    (method == "grantRole").into(),
                );
            }
            "transferOwnership" => {
                let owner = args.first().cloned().unwrap_or(ParamValue::Bool(false));
                self.set_view(contract, "owner", &[], owner);
            }
            _ => {}
        }

        Ok(())
    }
}

#[async_trait]
impl StateReader for MockLedger {
    async fn read(
        &self,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
    ) -> Result<ParamValue, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;

        if state.failing_reads.contains(method) {
            return Err(reverted(contract, method, "injected read failure"));
        }

        state.read(contract, method, args)
    }
}

#[async_trait]
impl TransactionExecutor for MockLedger {
    fn sender(&self) -> Address {
        Self::DEPLOYER
    }

    async fn execute(
        &self,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
    ) -> Result<TxHash, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;

        if state.failing_writes.contains(method) {
            return Err(reverted(contract, method, "injected write failure"));
        }

        state.apply(contract, method, args)?;
        state.writes.push(WriteRecord {
            contract: contract.to_string(),
            method: method.to_owned(),
            args: args.to_vec(),
        });

        Ok(TxHash::with_last_byte(
            u8::try_from(state.writes.len() % 256).unwrap_or_default(),
        ))
    }
}

#[async_trait]
impl Deployer for MockLedger {
    async fn deploy(&self, request: &DeployRequest) -> Result<Deployment, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;

        if state.failing_deploys.contains(&request.name) {
            return Err(reverted(
                &Contract::named(&request.name),
                "constructor",
                "injected deploy failure",
            ));
        }

        if let Some((address, existing)) = state.deployments.get(&request.name)
            && existing == request
        {
            return Ok(Deployment {
                address: *address,
                newly_deployed: false,
            });
        }

        let address = Self::deployment_address(state.deployed.len() + 1);
        state
            .deployments
            .insert(request.name.clone(), (address, request.clone()));
        state.deployed.push(request.name.clone());

        Ok(Deployment {
            address,
            newly_deployed: true,
        })
    }

    async fn address_of(&self, name: &str) -> Result<Address, LedgerError> {
        self.state
            .lock()
            .unwrap()
            .deployments
            .get(name)
            .map(|(address, _)| *address)
            .ok_or_else(|| LedgerError::UnknownContract(name.to_owned()))
    }
}
