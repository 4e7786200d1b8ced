use std::io::Write;
use std::path::PathBuf;

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::ProviderBuilder;
use clap::{Parser, Subcommand};
use st0x_evm::local::RawPrivateKeyWallet;
use tracing::info;

use crate::composite::CompositeAssembler;
use crate::config::{Ctx, Env};
use crate::deployments::{DeploymentStore, EvmLedger};
use crate::governance::GovernanceBootstrap;
use crate::ledger::{Deployer, Ledger};
use crate::plan::{BatchPolicy, Plan, PlanRunner};
use crate::provision::VaultNft;
use crate::strategy::{FeeTier, M_STRATEGY, MStrategyBootstrap, MStrategyInit};

const STRATEGY_TREASURY_ACCOUNT: &str = "mStrategyTreasury";
const STRATEGY_ADMIN_ACCOUNT: &str = "mStrategyAdmin";
const ADMIN_ACCOUNT: &str = "admin";
const UNISWAP_V3_FACTORY_ACCOUNT: &str = "uniswapV3Factory";
const UNISWAP_V3_ROUTER_ACCOUNT: &str = "uniswapV3Router";

#[derive(Debug, Parser)]
#[command(name = "provision")]
#[command(about = "Idempotent vault provisioning")]
#[command(version)]
pub struct Cli {
    #[clap(flatten)]
    pub env: Env,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Provision every vault declared in a plan file
    Vaults {
        /// Path to the TOML plan with `[[vaults]]` entries
        #[arg(long)]
        plan: PathBuf,
        /// Keep going after a vault fails instead of stopping
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Combine member vaults under a gateway vault and an LP issuer vault
    Combine {
        /// Nft the gateway vault must receive; the LP issuer gets the next one
        #[arg(long)]
        expected_nft: u64,
        /// Member vault nfts, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        members: Vec<u64>,
        /// Strategy address; defaults to the MStrategy deployment
        #[arg(long)]
        strategy: Option<Address>,
    },
    /// Deploy and wire up the LP issuer governance and its factory
    LpIssuerGovernance,
    /// Deploy the Uniswap V3 oracle
    Oracle,
    /// Deploy MStrategy behind its proxy
    MStrategyDeploy,
    /// Register the MStrategy vault pair and hand over the admin role
    MStrategyInit {
        /// The two pool tokens, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        tokens: Vec<Address>,
        #[arg(long)]
        erc20_vault: Address,
        #[arg(long)]
        money_vault: Address,
        /// Uniswap V3 fee tier of the pool: 500, 3000 or 10000
        #[arg(long, default_value_t = 3000)]
        fee: u32,
    },
}

impl Cli {
    /// Parse CLI arguments and load the config and secrets they point at
    pub fn parse_and_load() -> anyhow::Result<(Ctx, Commands)> {
        let cli = Self::parse();
        let ctx = Ctx::load_files(&cli.env.config, &cli.env.secrets)?;
        Ok((ctx, cli.command))
    }
}

pub async fn run(ctx: Ctx, command: Commands) -> anyhow::Result<()> {
    let signer = ctx.signer()?;
    info!(deployer = %signer.address(), network = %ctx.network, "Connecting");

    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect_http(ctx.rpc_url.clone());
    let wallet = RawPrivateKeyWallet::new(provider, ctx.required_confirmations);
    let store = DeploymentStore::new(ctx.deployments_dir(), ctx.artifacts_dir.clone());
    let ledger = EvmLedger::new(wallet, store);

    run_command_with_writers(&ctx, command, &ledger, &mut std::io::stdout()).await
}

async fn run_command_with_writers<L, W>(
    ctx: &Ctx,
    command: Commands,
    ledger: &L,
    stdout: &mut W,
) -> anyhow::Result<()>
where
    L: Ledger + Deployer + ?Sized,
    W: Write,
{
    match command {
        Commands::Vaults {
            plan,
            continue_on_error,
        } => {
            let plan = Plan::load(&plan)?;
            let policy = if continue_on_error {
                BatchPolicy::ContinueOnError
            } else {
                BatchPolicy::AbortOnError
            };

            let report = PlanRunner::new(ledger, policy).run(&plan).await?;

            for vault in &report.vaults {
                match &vault.result {
                    Ok(outcome) => writeln!(
                        stdout,
                        "nft {}: {:?} ({} writes)",
                        vault.nft, outcome.state, outcome.writes
                    )?,
                    Err(error) => writeln!(stdout, "nft {}: failed: {error}", vault.nft)?,
                }
            }
            for nft in &report.skipped {
                writeln!(stdout, "nft {nft}: skipped")?;
            }

            if !report.is_success() {
                anyhow::bail!(
                    "{} vault(s) failed, {} skipped",
                    report.failures(),
                    report.skipped.len()
                );
            }
        }
        Commands::Combine {
            expected_nft,
            members,
            strategy,
        } => {
            let treasury = ctx.accounts.get(STRATEGY_TREASURY_ACCOUNT)?;
            let strategy = match strategy {
                Some(strategy) => strategy,
                None => ledger.address_of(M_STRATEGY).await?,
            };
            let members = members.into_iter().map(VaultNft).collect::<Vec<_>>();

            let outcome = CompositeAssembler::new(ledger)
                .assemble(
                    VaultNft(expected_nft),
                    &members,
                    strategy,
                    treasury,
                    &ctx.composite,
                )
                .await?;

            writeln!(
                stdout,
                "gateway nft {}, lp issuer nft {} at {}",
                outcome.gateway.nft, outcome.lp_issuer.nft, outcome.lp_issuer_address
            )?;
        }
        Commands::LpIssuerGovernance => {
            let setup = GovernanceBootstrap::new(ledger)
                .setup_lp_issuer_governance()
                .await?;
            writeln!(
                stdout,
                "LpIssuerGovernance at {}, LpIssuerFactory at {} ({} writes)",
                setup.governance, setup.factory, setup.writes
            )?;
        }
        Commands::Oracle => {
            let factory = ctx.accounts.get(UNISWAP_V3_FACTORY_ACCOUNT)?;
            let admin = ctx.accounts.get(ADMIN_ACCOUNT)?;
            let oracle = GovernanceBootstrap::new(ledger)
                .deploy_oracle(factory, admin)
                .await?;
            writeln!(stdout, "UniV3Oracle at {}", oracle.address)?;
        }
        Commands::MStrategyDeploy => {
            let admin = ctx.accounts.get(STRATEGY_ADMIN_ACCOUNT)?;
            let deployment = MStrategyBootstrap::new(ledger, admin).deploy().await?;
            writeln!(
                stdout,
                "MStrategy at {}, proxy admin at {} ({} writes)",
                deployment.strategy, deployment.proxy_admin, deployment.writes
            )?;
        }
        Commands::MStrategyInit {
            tokens,
            erc20_vault,
            money_vault,
            fee,
        } => {
            let admin = ctx.accounts.get(STRATEGY_ADMIN_ACCOUNT)?;
            let init = MStrategyInit {
                tokens,
                erc20_vault,
                money_vault,
                fee: FeeTier::try_from(fee)?,
                uniswap_v3_factory: ctx.accounts.get(UNISWAP_V3_FACTORY_ACCOUNT)?,
                uniswap_v3_router: ctx.accounts.get(UNISWAP_V3_ROUTER_ACCOUNT)?,
                config: ctx.m_strategy()?.clone(),
            };

            let outcome = MStrategyBootstrap::new(ledger, admin).init(&init).await?;
            match outcome.pool {
                Some(pool) => writeln!(stdout, "Registered pool {pool} ({} writes)", outcome.writes)?,
                None => writeln!(stdout, "MStrategy already initialized ({} writes)", outcome.writes)?,
            }
        }
    }

    Ok(())
}
