use anyhow::Context;
use flock_core::{config::Config, io, paths};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing flock in: {}", root.display());

    for dir in [paths::FLOCK_DIR, paths::RUNS_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_path = paths::config_path(root);
    if !config_path.exists() {
        Config::default()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    // Checkpoints hold generated auth keys.
    let ignore = format!("{}/", paths::RUNS_DIR);
    io::ensure_gitignore_entry(root, &ignore).context("failed to update .gitignore")?;
    println!("  ignored: {ignore}");

    println!();
    println!("Next: set github.owner in {} and export the tokens it names.", paths::CONFIG_FILE);
    Ok(())
}
