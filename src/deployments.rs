//! EVM-backed ledger over a hardhat-deploy style deployments directory.
//!
//! [`DeploymentStore`] reads `<Name>.json` deployment records (address,
//! ABI, constructor args) and `<Artifact>.json` build artifacts (ABI,
//! creation bytecode). [`EvmLedger`] resolves contracts through the store,
//! encodes [`ParamValue`] arguments against the ABI and decodes results
//! back, delegating signing and submission to a [`Wallet`].

use std::io;
use std::path::{Path, PathBuf};

use alloy::dyn_abi::{DynSolType, DynSolValue, FunctionExt, JsonAbiExt, Specifier};
use alloy::json_abi::{Function, JsonAbi, Param};
use alloy::primitives::{Address, B256, Bytes, TxHash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use st0x_evm::{EvmError, Wallet};
use tracing::{debug, info};

use crate::ledger::{
    Contract, DeployRequest, Deployer, Deployment, LedgerError, ProxyOptions, StateReader,
    TransactionExecutor,
};
use crate::params::{ParamValue, RawStruct};

#[derive(Debug, thiserror::Error)]
pub enum DeploymentStoreError {
    #[error("failed to access {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// A recorded deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub address: Address,
    pub abi: JsonAbi,
    #[serde(default)]
    pub args: Vec<ParamValue>,
    /// Creation bytecode the record was deployed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytecode: Option<Bytes>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ArtifactBytecode {
    Hex(Bytes),
    Object { object: Bytes },
}

/// Compiled contract: ABI plus creation bytecode.
#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    pub abi: JsonAbi,
    #[serde(deserialize_with = "deserialize_bytecode")]
    pub bytecode: Bytes,
}

fn deserialize_bytecode<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    Ok(match ArtifactBytecode::deserialize(deserializer)? {
        ArtifactBytecode::Hex(bytes) | ArtifactBytecode::Object { object: bytes } => bytes,
    })
}

#[derive(Debug, Clone)]
pub struct DeploymentStore {
    deployments_dir: PathBuf,
    artifacts_dir: PathBuf,
}

impl DeploymentStore {
    pub fn new(deployments_dir: impl Into<PathBuf>, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            deployments_dir: deployments_dir.into(),
            artifacts_dir: artifacts_dir.into(),
        }
    }

    /// The deployment recorded under `name`, if any.
    pub fn load(&self, name: &str) -> Result<Option<DeploymentRecord>, DeploymentStoreError> {
        read_json(&self.deployments_dir.join(format!("{name}.json")))
    }

    pub fn save(&self, name: &str, record: &DeploymentRecord) -> Result<(), DeploymentStoreError> {
        let path = self.deployments_dir.join(format!("{name}.json"));
        let io_error = |source| DeploymentStoreError::Io {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.deployments_dir).map_err(io_error)?;
        let json = serde_json::to_string_pretty(record).map_err(|source| {
            DeploymentStoreError::Json {
                path: path.clone(),
                source,
            }
        })?;
        std::fs::write(&path, json).map_err(io_error)
    }

    pub fn artifact(&self, name: &str) -> Result<Option<Artifact>, DeploymentStoreError> {
        read_json(&self.artifacts_dir.join(format!("{name}.json")))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, DeploymentStoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(DeploymentStoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| DeploymentStoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Picks the function called `method`, or the one whose full signature
/// equals `method` when it contains parentheses.
fn select_function<'a>(
    abi: &'a JsonAbi,
    contract: &Contract,
    method: &str,
) -> Result<&'a Function, LedgerError> {
    let unsupported = || LedgerError::Unsupported {
        contract: contract.to_string(),
        method: method.to_owned(),
    };

    if method.contains('(') {
        return abi
            .functions()
            .find(|function| function.signature() == method)
            .ok_or_else(unsupported);
    }

    match abi.function(method).map(Vec::as_slice) {
        Some([function]) => Ok(function),
        Some([_, _, ..]) => Err(LedgerError::Encoding {
            contract: contract.to_string(),
            method: method.to_owned(),
            reason: "overloaded; call it by full signature".to_owned(),
        }),
        _ => Err(unsupported()),
    }
}

fn encoding_error(contract: &Contract, method: &str) -> impl Fn(String) -> LedgerError + use<> {
    let contract = contract.to_string();
    let method = method.to_owned();
    move |reason| LedgerError::Encoding {
        contract: contract.clone(),
        method: method.clone(),
        reason,
    }
}

/// Coerces `args` against ABI `inputs`.
fn coerce_args(inputs: &[Param], args: &[ParamValue]) -> Result<Vec<DynSolValue>, String> {
    if inputs.len() != args.len() {
        return Err(format!(
            "expected {} arguments, got {}",
            inputs.len(),
            args.len()
        ));
    }

    inputs
        .iter()
        .zip(args)
        .map(|(param, value)| coerce_param(param, value))
        .collect()
}

fn coerce_param(param: &Param, value: &ParamValue) -> Result<DynSolValue, String> {
    if param.components.is_empty() {
        let ty = param.resolve().map_err(|error| error.to_string())?;
        return coerce(&ty, value);
    }

    let Some(dimensions) = param.ty.strip_prefix("tuple") else {
        return Err(format!("unexpected components on {}", param.ty));
    };
    if dimensions.is_empty() {
        return coerce_tuple(&param.components, value);
    }

    let items = value
        .as_list()
        .ok_or_else(|| format!("expected a list for {}, got {value}", param.ty))?;
    let element = element_param(param);
    let values = items
        .iter()
        .map(|item| coerce_param(&element, item))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(if dimensions.ends_with("[]") {
        DynSolValue::Array(values)
    } else {
        DynSolValue::FixedArray(values)
    })
}

/// The element of an array-of-tuples parameter.
fn element_param(param: &Param) -> Param {
    let ty = param
        .ty
        .rfind('[')
        .map_or_else(|| param.ty.clone(), |index| param.ty[..index].to_owned());

    Param {
        ty,
        ..param.clone()
    }
}

fn coerce_tuple(components: &[Param], value: &ParamValue) -> Result<DynSolValue, String> {
    let values = match value {
        ParamValue::List(items) if items.len() == components.len() => components
            .iter()
            .zip(items)
            .map(|(component, item)| coerce_param(component, item))
            .collect::<Result<Vec<_>, _>>()?,
        ParamValue::Struct(_) | ParamValue::Raw(_) => components
            .iter()
            .map(|component| {
                let field = value
                    .field(&component.name)
                    .ok_or_else(|| format!("missing field {}", component.name))?;
                coerce_param(component, field)
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(format!("cannot encode {value} as a tuple")),
    };

    Ok(DynSolValue::Tuple(values))
}

fn coerce(ty: &DynSolType, value: &ParamValue) -> Result<DynSolValue, String> {
    let mismatch = || format!("cannot encode {value} as {ty}");

    Ok(match (ty, value) {
        (DynSolType::Bool, ParamValue::Bool(flag)) => DynSolValue::Bool(*flag),
        (DynSolType::Uint(bits), _) => {
            let number = value.as_uint().ok_or_else(mismatch)?;
            if number.bit_len() > *bits {
                return Err(format!("{number} does not fit in uint{bits}"));
            }
            DynSolValue::Uint(number, *bits)
        }
        (DynSolType::Int(bits), ParamValue::Int(number)) => DynSolValue::Int(*number, *bits),
        (DynSolType::Int(bits), ParamValue::Uint(number)) => DynSolValue::Int(
            alloy::primitives::I256::try_from(*number).map_err(|_| mismatch())?,
            *bits,
        ),
        (DynSolType::Address, ParamValue::Address(address)) => DynSolValue::Address(*address),
        (DynSolType::FixedBytes(size), ParamValue::FixedBytes(word)) => {
            DynSolValue::FixedBytes(*word, *size)
        }
        (DynSolType::FixedBytes(size), ParamValue::Bytes(bytes)) if bytes.len() == *size => {
            DynSolValue::FixedBytes(B256::right_padding_from(bytes), *size)
        }
        (DynSolType::Bytes, ParamValue::Bytes(bytes)) => DynSolValue::Bytes(bytes.to_vec()),
        (DynSolType::String, ParamValue::String(text)) => DynSolValue::String(text.clone()),
        (DynSolType::String, ParamValue::Uint(number)) => DynSolValue::String(number.to_string()),
        (DynSolType::Array(inner), ParamValue::List(items)) => DynSolValue::Array(
            items
                .iter()
                .map(|item| coerce(inner, item))
                .collect::<Result<_, _>>()?,
        ),
        (DynSolType::FixedArray(inner, size), ParamValue::List(items)) if items.len() == *size => {
            DynSolValue::FixedArray(
                items
                    .iter()
                    .map(|item| coerce(inner, item))
                    .collect::<Result<_, _>>()?,
            )
        }
        (DynSolType::Tuple(types), ParamValue::List(items)) if items.len() == types.len() => {
            DynSolValue::Tuple(
                types
                    .iter()
                    .zip(items)
                    .map(|(ty, item)| coerce(ty, item))
                    .collect::<Result<_, _>>()?,
            )
        }
        _ => return Err(mismatch()),
    })
}

/// Converts decoded outputs; named tuples keep their positional entries.
fn decode_outputs(outputs: &[Param], mut values: Vec<DynSolValue>) -> ParamValue {
    if let [output] = outputs
        && values.len() == 1
        && let Some(value) = values.pop()
    {
        return from_dyn(output, value);
    }

    ParamValue::Raw(struct_from(outputs, values))
}

fn struct_from(components: &[Param], values: Vec<DynSolValue>) -> RawStruct {
    RawStruct::from_fields(
        components
            .iter()
            .zip(values)
            .map(|(component, value)| (Some(component.name.clone()), from_dyn(component, value))),
    )
}

fn from_dyn(param: &Param, value: DynSolValue) -> ParamValue {
    match value {
        DynSolValue::Tuple(values) if !param.components.is_empty() => {
            ParamValue::Raw(struct_from(&param.components, values))
        }
        DynSolValue::Array(values) | DynSolValue::FixedArray(values)
            if !param.components.is_empty() =>
        {
            let element = element_param(param);
            ParamValue::List(
                values
                    .into_iter()
                    .map(|value| from_dyn(&element, value))
                    .collect(),
            )
        }
        other => plain(other),
    }
}

fn plain(value: DynSolValue) -> ParamValue {
    match value {
        DynSolValue::Bool(flag) => ParamValue::Bool(flag),
        DynSolValue::Int(number, _) => ParamValue::Int(number),
        DynSolValue::Uint(number, _) => ParamValue::Uint(number),
        DynSolValue::FixedBytes(word, _) => ParamValue::FixedBytes(word),
        DynSolValue::Address(address) => ParamValue::Address(address),
        DynSolValue::Function(function) => {
            ParamValue::Bytes(Bytes::copy_from_slice(function.as_slice()))
        }
        DynSolValue::Bytes(bytes) => ParamValue::Bytes(bytes.into()),
        DynSolValue::String(text) => ParamValue::String(text),
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) | DynSolValue::Tuple(values) => {
            ParamValue::List(values.into_iter().map(plain).collect())
        }
        #[allow(unreachable_patterns)]
        other => ParamValue::Bytes(other.abi_encode().into()),
    }
}

/// Chain-backed [`Ledger`](crate::ledger::Ledger) and [`Deployer`].
pub struct EvmLedger<W> {
    wallet: W,
    store: DeploymentStore,
}

impl<W: Wallet> EvmLedger<W> {
    pub fn new(wallet: W, store: DeploymentStore) -> Self {
        Self { wallet, store }
    }

    fn resolve(&self, contract: &Contract) -> Result<(JsonAbi, Address), LedgerError> {
        match contract {
            Contract::Named(name) => self
                .store
                .load(name)?
                .map(|record| (record.abi, record.address))
                .ok_or_else(|| LedgerError::UnknownContract(name.clone())),
            Contract::At { abi, address } => self
                .store
                .artifact(abi)?
                .map(|artifact| (artifact.abi, *address))
                .ok_or_else(|| LedgerError::UnknownArtifact(abi.clone())),
        }
    }

    fn encode_call(
        abi: &JsonAbi,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
    ) -> Result<(Function, Bytes), LedgerError> {
        let function = select_function(abi, contract, method)?;
        let encoding = encoding_error(contract, method);
        let values = coerce_args(&function.inputs, args).map_err(&encoding)?;
        let calldata = function
            .abi_encode_input(&values)
            .map_err(|error| encoding(error.to_string()))?;

        Ok((function.clone(), calldata.into()))
    }

    async fn deploy_direct(
        &self,
        name: &str,
        artifact_name: &str,
        args: &[ParamValue],
    ) -> Result<(Deployment, JsonAbi), LedgerError> {
        let artifact = self
            .store
            .artifact(artifact_name)?
            .ok_or_else(|| LedgerError::UnknownArtifact(artifact_name.to_owned()))?;

        if let Some(existing) = self.store.load(name)?
            && existing.bytecode.as_ref() == Some(&artifact.bytecode)
            && existing.args == args
        {
            info!(address = %existing.address, "Reusing {name}");
            return Ok((
                Deployment {
                    address: existing.address,
                    newly_deployed: false,
                },
                existing.abi,
            ));
        }

        let constructor_args = match artifact.abi.constructor() {
            Some(constructor) => {
                let contract = Contract::named(name);
                let encoding = encoding_error(&contract, "constructor");
                let values = coerce_args(&constructor.inputs, args).map_err(&encoding)?;
                constructor
                    .abi_encode_input(&values)
                    .map_err(|error| encoding(error.to_string()))?
            }
            None if args.is_empty() => Vec::new(),
            None => {
                return Err(LedgerError::Encoding {
                    contract: name.to_owned(),
                    method: "constructor".to_owned(),
                    reason: format!("{artifact_name} takes no constructor arguments"),
                });
            }
        };

        let mut init_code = artifact.bytecode.to_vec();
        init_code.extend_from_slice(&constructor_args);

        info!("Deploying {name}...");
        let address = self
            .wallet
            .deploy(init_code.into(), &format!("deploy {name}"))
            .await?;
        info!(%address, "Deployed {name}");

        self.store.save(
            name,
            &DeploymentRecord {
                address,
                abi: artifact.abi.clone(),
                args: args.to_vec(),
                bytecode: Some(artifact.bytecode),
            },
        )?;

        Ok((
            Deployment {
                address,
                newly_deployed: true,
            },
            artifact.abi,
        ))
    }

    async fn deploy_proxied(
        &self,
        request: &DeployRequest,
        proxy: &ProxyOptions,
    ) -> Result<Deployment, LedgerError> {
        let (implementation, implementation_abi) = self
            .deploy_direct(
                &format!("{}_Implementation", request.name),
                request.artifact_name(),
                &request.args,
            )
            .await?;
        let admin = self.address_of(&proxy.admin).await?;

        let init_calldata = match &proxy.init {
            Some((method, args)) => {
                let contract = Contract::named(&request.name);
                Self::encode_call(&implementation_abi, &contract, method, args)?.1
            }
            None => Bytes::new(),
        };

        let proxy_name = format!("{}_Proxy", request.name);
        let (proxy_deployment, newly_deployed) = match self.store.load(&proxy_name)? {
            Some(mut existing) => {
                let current = existing.args.first().and_then(ParamValue::as_address);
                if current != Some(implementation.address) {
                    info!(
                        proxy = %existing.address,
                        implementation = %implementation.address,
                        "Upgrading {}",
                        request.name
                    );
                    self.execute(
                        &Contract::named(&proxy.admin),
                        "upgrade",
                        &[existing.address.into(), implementation.address.into()],
                    )
                    .await?;
                    if let Some(first) = existing.args.first_mut() {
                        *first = implementation.address.into();
                    }
                    self.store.save(&proxy_name, &existing)?;
                }
                (existing.address, implementation.newly_deployed)
            }
            None => {
                let (deployment, _) = self
                    .deploy_direct(
                        &proxy_name,
                        &proxy.proxy_artifact,
                        &[
                            implementation.address.into(),
                            admin.into(),
                            init_calldata.into(),
                        ],
                    )
                    .await?;
                (deployment.address, true)
            }
        };

        self.store.save(
            &request.name,
            &DeploymentRecord {
                address: proxy_deployment,
                abi: implementation_abi,
                args: request.args.clone(),
                bytecode: None,
            },
        )?;

        Ok(Deployment {
            address: proxy_deployment,
            newly_deployed,
        })
    }
}

#[async_trait]
impl<W: Wallet> StateReader for EvmLedger<W> {
    async fn read(
        &self,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
    ) -> Result<ParamValue, LedgerError> {
        let (abi, address) = self.resolve(contract)?;
        let (function, calldata) = Self::encode_call(&abi, contract, method, args)?;

        debug!(%contract, method, "Reading");
        let output = self
            .wallet
            .call(address, calldata)
            .await
            .map_err(|error| match error {
                EvmError::EmptyRevert { .. } => LedgerError::Unsupported {
                    contract: contract.to_string(),
                    method: method.to_owned(),
                },
                EvmError::Revert { reason, .. } => LedgerError::Reverted {
                    contract: contract.to_string(),
                    method: method.to_owned(),
                    reason,
                },
                other => LedgerError::Evm(other),
            })?;

        let values = function
            .abi_decode_output(&output)
            .map_err(|error| encoding_error(contract, method)(error.to_string()))?;

        Ok(decode_outputs(&function.outputs, values))
    }
}

#[async_trait]
impl<W: Wallet> TransactionExecutor for EvmLedger<W> {
    fn sender(&self) -> Address {
        self.wallet.address()
    }

    async fn execute(
        &self,
        contract: &Contract,
        method: &str,
        args: &[ParamValue],
    ) -> Result<TxHash, LedgerError> {
        let (abi, address) = self.resolve(contract)?;
        let (_, calldata) = Self::encode_call(&abi, contract, method, args)?;

        let receipt = self
            .wallet
            .send(address, calldata, &format!("{contract}.{method}"))
            .await
            .map_err(|error| match error {
                EvmError::Revert { reason, .. } => LedgerError::Reverted {
                    contract: contract.to_string(),
                    method: method.to_owned(),
                    reason,
                },
                EvmError::EmptyRevert { .. } => LedgerError::Reverted {
                    contract: contract.to_string(),
                    method: method.to_owned(),
                    reason: "reverted without data".to_owned(),
                },
                other => LedgerError::Evm(other),
            })?;

        Ok(receipt.transaction_hash)
    }
}

#[async_trait]
impl<W: Wallet> Deployer for EvmLedger<W> {
    async fn deploy(&self, request: &DeployRequest) -> Result<Deployment, LedgerError> {
        match &request.proxy {
            Some(proxy) => self.deploy_proxied(request, proxy).await,
            None => Ok(self
                .deploy_direct(&request.name, request.artifact_name(), &request.args)
                .await?
                .0),
        }
    }

    async fn address_of(&self, name: &str) -> Result<Address, LedgerError> {
        self.store
            .load(name)?
            .map(|record| record.address)
            .ok_or_else(|| LedgerError::UnknownContract(name.to_owned()))
    }
}
