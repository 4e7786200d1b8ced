//! Idempotent provisioning of vaults, governances and strategies.

use st0x_provision::cli;
use st0x_provision::setup_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (ctx, command) = cli::Cli::parse_and_load()?;
    setup_tracing(&ctx.log_level);

    cli::run(ctx, command).await?;
    Ok(())
}
