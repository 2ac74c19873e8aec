//! `switchboard models` - Show the model catalog and routing table.

use switchboard_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("🤖 Configured Models");
    println!("─────────────────────────────────────────────────────────────");
    println!("{:<24} {:<12} {:<14} {:>10}", "Model", "Provider", "Temperature", "Max tokens");
    for model in &config.models {
        let temperature = if model.fixed_temperature_only {
            format!("fixed {:.1}", model.fixed_temperature)
        } else {
            format!("{:.1}–{:.2}", model.temperature_range.min, model.temperature_range.max)
        };
        let keyed = config
            .provider(model.family)
            .and_then(|p| p.api_key.as_ref())
            .is_some();
        println!(
            "{:<24} {:<12} {:<14} {:>10}{}",
            model.id,
            model.family,
            temperature,
            model.max_tokens,
            if keyed { "" } else { "  (no key)" }
        );
    }

    println!();
    println!("🧭 Routing");
    println!("─────────────────────────────────────");
    for (category, model) in &config.routing.table {
        println!("  {:<10} → {}", category, model);
    }
    println!("  classifier → {}", config.routing.classifier_model);
    println!("  fallback   → {}", config.routing.fallback_model);

    Ok(())
}
