use anyhow::Result;

use newsstation_core::{Category, QueryService};

pub async fn run(query: &QueryService) -> Result<()> {
    let registry = query.aggregator().registry();

    if registry.is_empty() {
        println!("No sources are enabled.");
        println!("\nEnable sources under [sources] in:");
        println!("  {}", newsstation_core::AppConfig::config_path().display());
        return Ok(());
    }

    println!("Sources ({}):\n", registry.len());
    for source in registry.all() {
        let categories: Vec<&str> = Category::ALL
            .into_iter()
            .filter(|c| source.serves(*c))
            .map(|c| c.as_str())
            .collect();

        println!("  {} - {}", source.info().id, source.info().name);
        println!("    Article ids: {}-*", source.id_prefix());
        println!("    Categories: {}", categories.join(", "));
        println!();
    }

    Ok(())
}
