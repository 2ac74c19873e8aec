//! `switchboard account|grant|unlimited` - Credit administration.

use switchboard_core::ledger::{Account, AllowanceLedger};
use tracing::info;

use super::open_store;

fn print_account(account: &Account) {
    println!("💳 {}", account.user_id);
    if account.unlimited {
        println!("   Credits:   unlimited");
    } else {
        println!("   Credits:   {}", account.credits);
    }
    println!("   Used:      {}", account.credits_used);
}

pub async fn show(user: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (config, store) = open_store().await?;
    match store.balance(user).await? {
        Some(account) => print_account(&account),
        None => {
            println!("💳 {user}");
            println!("   No account yet; first use grants {} credits.", config.ledger.initial_grant);
        }
    }
    Ok(())
}

pub async fn grant(user: &str, credits: i64) -> Result<(), Box<dyn std::error::Error>> {
    let (_, store) = open_store().await?;
    let account = store.grant(user, credits).await?;
    info!(user_id = user, credits, balance = account.credits, "Granted credits");
    println!("✅ Granted {credits} credits");
    print_account(&account);
    Ok(())
}

pub async fn unlimited(user: &str, enabled: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (_, store) = open_store().await?;
    let account = store.set_unlimited(user, enabled).await?;
    info!(user_id = user, unlimited = enabled, "Changed unlimited usage");
    println!("✅ Unlimited usage {}", if enabled { "enabled" } else { "disabled" });
    print_account(&account);
    Ok(())
}
