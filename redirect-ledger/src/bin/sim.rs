//! Ledger simulator binary
//!
//! Runs a scripted scenario against in-memory collaborators and prints the
//! resulting views. Pass a TOML config path as the first argument, or
//! configure through `LEDGER_*` environment variables.

use anyhow::Context as _;
use redirect_ledger::simulation::{SimulatedAsset, SimulatedStrategy};
use redirect_ledger::{AccountId, AdminCommand, Config, FungibleAsset, HatId, Ledger};
use rust_decimal::Decimal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        None => Config::from_env().context("loading config from environment")?,
    };
    // Simulated collaborators do not survive a restart
    config.persistence_enabled = false;

    tracing::info!(service = %config.service_name, version = %config.service_version, "Starting simulation");

    let owner = config.owner_account();
    let alice = AccountId::new("alice");
    let bob = AccountId::new("bob");
    let carol = AccountId::new("carol");
    let dave = AccountId::new("dave");

    let mut base = SimulatedAsset::new("DAI");
    let comp = SimulatedAsset::new("COMP");
    let strategy = SimulatedStrategy::new(AccountId::new("strategy"), base.clone(), Decimal::ONE);
    let address = config.ledger_account();

    for (holder, amount) in [(&alice, 100), (&bob, 50)] {
        base.mint(holder, Decimal::from(amount));
        base.approve(holder, &address, Decimal::from(amount))?;
    }

    let ledger = Ledger::open(config, Box::new(strategy.clone()), Box::new(base.clone())).await?;
    let handle = ledger.handle();

    // Deposits
    ledger.mint(alice.clone(), Decimal::from(100)).await?;
    let hat_id = handle
        .mint_with_new_hat(bob.clone(), Decimal::from(50), vec![carol.clone(), dave.clone()], vec![90, 10])
        .await?;
    tracing::info!(hat_id = %hat_id, "Bob redirects to carol and dave");

    // Yield
    strategy.accrue(Decimal::new(10000108, 7));
    let paid = ledger.pay_interest(carol.clone()).await?;
    tracing::info!(amount = %paid, "Carol realized interest");

    // Rewards
    strategy.fund_rewards(&comp, Decimal::from(10));
    handle
        .admin(owner.clone(), AdminCommand::SetRewardsToken(Box::new(comp.clone())))
        .await?;
    handle
        .admin(owner.clone(), AdminCommand::SetWithdrawAddress(address.clone()))
        .await?;
    let collection = ledger.collect_rewards().await?;
    tracing::info!(gross = %collection.gross, distributed = %collection.distributed, "Rewards collected");
    ledger.withdraw_rewards(carol.clone()).await?;

    // Withdrawals
    let redeemed = ledger.redeem(alice.clone(), Decimal::from(10)).await?;
    tracing::info!(amount = %redeemed, "Alice redeemed");
    ledger.change_hat(bob.clone(), HatId::SELF).await?;

    for account in [&alice, &bob, &carol, &dave] {
        let stats = ledger.account_stats(account.clone()).await?;
        println!("{}: {}", account, serde_json::to_string_pretty(&stats)?);
    }
    println!("global: {}", serde_json::to_string_pretty(&ledger.global_stats().await?)?);
    println!("COMP held by carol: {}", comp.balance_of(&carol));

    let report = ledger.check_conservation().await?;
    println!("invariants: {}", serde_json::to_string_pretty(&report)?);

    ledger.shutdown().await?;
    tracing::info!("Simulation finished");
    Ok(())
}
