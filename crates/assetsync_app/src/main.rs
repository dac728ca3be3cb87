//! Cache maintenance for the transfer engine.
//!
//! Usage: `assetsync [status|trim|clear] [settings.ron]`

use std::path::PathBuf;

use anyhow::{bail, Context};
use assetsync_app::{load_sticky_operations, Settings};
use assetsync_engine::{CacheStore, GIGABYTE};
use engine_logging::engine_info;

const DEFAULT_SETTINGS: &str = "assetsync.ron";

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "status".to_string());
    let settings_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS));

    let settings = Settings::load(&settings_path);
    engine_logging::initialize(settings.log_destination(), settings.level());

    let cache = CacheStore::open(settings.cache_settings())
        .with_context(|| format!("opening cache at {:?}", settings.cache_dir))?;

    match command.as_str() {
        "status" => {
            println!(
                "cache {:?}: {} entries, {:.2} of {} GB",
                settings.cache_dir,
                cache.len(),
                cache.total_size() as f64 / GIGABYTE as f64,
                cache.max_size_bytes() / GIGABYTE
            );
            for op in load_sticky_operations(&settings.state_dir) {
                println!("{:?} {} {:?}: {}", op.kind, op.id, op.status, op.description);
            }
        }
        "trim" => {
            let report = cache.clear_extra().context("clearing extra cache")?;
            engine_info!(
                "Evicted {} entries, freed {} bytes",
                report.evicted.len(),
                report.freed_bytes
            );
            println!(
                "evicted {} entries, {} bytes remain",
                report.evicted.len(),
                report.remaining_bytes
            );
        }
        "clear" => {
            let removed = cache.clear().context("clearing cache")?;
            println!("removed {removed} entries");
        }
        other => bail!("unknown command {other:?}, expected status, trim or clear"),
    }
    Ok(())
}
