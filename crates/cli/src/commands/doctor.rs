//! `hearthclaw doctor` — provider and plugin health checks.

use crate::commands::load_registry;
use hearthclaw_config::AppConfig;
use hearthclaw_plugins::PluginGateway;
use std::path::Path;

pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    println!("Hearthclaw Doctor");
    println!("=================\n");

    let mut issues = 0;

    // Config
    let config = if config_path.exists() {
        match AppConfig::load(config_path) {
            Ok(config) => {
                println!("  ✅ Config file valid ({})", config_path.display());
                config
            }
            Err(e) => {
                println!("  ❌ Config file invalid: {e}");
                return summary(1);
            }
        }
    } else {
        println!(
            "  ⚠️  No config file at {} — using defaults",
            config_path.display()
        );
        issues += 1;
        AppConfig::load_or_default(config_path)?
    };

    // Provider
    match hearthclaw_providers::build_provider(&config) {
        Ok(provider) => match provider.health_check().await {
            Ok(true) => println!("  ✅ Provider '{}' reachable", provider.name()),
            Ok(false) | Err(_) => {
                println!("  ❌ Provider '{}' unreachable", provider.name());
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ Provider not configured: {e}");
            issues += 1;
        }
    }

    // Plugins
    match load_registry(&config) {
        Ok(registry) => {
            let count = registry.ids().len();
            if count == 0 {
                println!("  ⚠️  No plugins registered");
            } else {
                println!("  ✅ Plugin manifest loaded ({count} plugins)");
                let gateway = PluginGateway::new(registry, &config.plugins);
                for (plugin_id, healthy) in gateway.health_report().await {
                    if healthy {
                        println!("     ✅ {plugin_id}");
                    } else {
                        println!("     ❌ {plugin_id} failed its health probe");
                        issues += 1;
                    }
                }
            }
        }
        Err(e) => {
            println!("  ❌ Plugin manifest invalid: {e}");
            issues += 1;
        }
    }

    summary(issues)
}

fn summary(issues: u32) -> anyhow::Result<()> {
    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }
    Ok(())
}
