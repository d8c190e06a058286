//! `cogloop models` — Show which weights each role would load.

use super::load_config;
use cogloop_core::provider::ModelRole;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let models = &config.models;

    println!("🧠 Cogloop Models");
    println!("=================");
    println!("  Model dir:     {}", models.base_dir.display());
    println!("  Context size:  {}", models.context_size);
    println!("  Acceleration:  {} layers", models.acceleration_level);
    println!("  Seed:          {}", models.seed);
    println!(
        "  Backend:       {}",
        if cfg!(feature = "local") {
            "local (candle)"
        } else {
            "not compiled in (build with --features local)"
        }
    );

    for role in ModelRole::ALL {
        let weights = models.weights_path(role);
        let tokenizer = models.tokenizer_path(role);
        let decoding = config.decoding.for_role(role);
        println!();
        println!("  [{role}]");
        println!("    Weights:    {} {}", weights.display(), presence(weights.is_file()));
        println!(
            "    Tokenizer:  {} {}",
            tokenizer.display(),
            presence(tokenizer.is_file())
        );
        println!(
            "    Decoding:   temperature {}, max_tokens {}, top_p {}",
            decoding.temperature, decoding.max_tokens, decoding.top_p
        );
    }

    Ok(())
}

fn presence(found: bool) -> &'static str {
    if found { "✅" } else { "❌ missing" }
}
