//! `switchboard usage|pricing` - Usage and cost reporting.

use switchboard_core::store::UsageSink;
use switchboard_telemetry::{format_cost_display, pricing_from_config};

use super::open_store;

/// Show a user's monthly totals and, optionally, their latest requests.
pub async fn usage(user: &str, recent: usize) -> Result<(), Box<dyn std::error::Error>> {
    let (_, store) = open_store().await?;
    let months = store.monthly_usage(user).await?;

    println!("📊 Usage for {user}");
    println!("─────────────────────────────────────────────────────");
    if months.is_empty() {
        println!("  No requests recorded.");
    } else {
        println!("{:<10} {:>9} {:>12} {:>12} {:>10}", "Month", "Requests", "Input tok", "Output tok", "Cost");
        for m in &months {
            println!(
                "{:<10} {:>9} {:>12} {:>12} {:>10}",
                m.month,
                m.requests,
                m.input_tokens,
                m.output_tokens,
                format_cost_display(m.cost_cents)
            );
        }
    }

    if recent > 0 {
        println!();
        println!("  Recent requests:");
        for r in store.recent_usage(user, recent).await? {
            let category = r.category.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
            println!(
                "    {}  {:<20} {:<9} {:>6}/{:<6} {}",
                r.timestamp.format("%Y-%m-%d %H:%M"),
                r.resolved_model,
                category,
                r.input_tokens,
                r.output_tokens,
                format_cost_display(r.cost_cents)
            );
        }
    }

    Ok(())
}

/// List model pricing, including overrides from the config.
pub async fn pricing() -> Result<(), Box<dyn std::error::Error>> {
    let config = switchboard_config::AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let table = pricing_from_config(&config);
    let models = table.models();

    println!("💰 Model Pricing (per 1M tokens)");
    println!("─────────────────────────────────────────────────────");
    println!("{:<40} {:>10} {:>10}", "Model", "Input", "Output");
    println!("{:<40} {:>10} {:>10}", "─────", "─────", "──────");

    for name in &models {
        if let Some(p) = table.get(name) {
            println!("{:<40} ${:>8.3} ${:>8.3}", name, p.input_per_m, p.output_per_m);
        }
    }

    println!();
    println!("  {} models with pricing data", models.len());

    Ok(())
}
