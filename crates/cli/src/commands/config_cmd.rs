//! `cogloop config` — Configuration management commands.

use super::load_config;
use cogloop_config::AppConfig;
use cogloop_core::provider::ModelRole;

pub fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    let mut warnings = Vec::new();
    if !config.models.base_dir.is_dir() {
        warnings.push(format!(
            "Model directory {} does not exist",
            config.models.base_dir.display()
        ));
    }
    for role in ModelRole::ALL {
        let weights = config.models.weights_path(role);
        if !weights.is_file() {
            warnings.push(format!("No {role} weights at {}", weights.display()));
        }
    }
    if config.engine.max_iterations > 50 {
        warnings.push("engine.max_iterations above 50 makes runs very long".to_string());
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Primary:         {}", config.models.primary.file);
    println!("   Secondary:       {}", config.models.secondary.file);
    println!("   Acceleration:    {}", config.models.acceleration_level);
    println!("   Max iterations:  {}", config.engine.max_iterations);

    Ok(())
}

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path() {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
}
