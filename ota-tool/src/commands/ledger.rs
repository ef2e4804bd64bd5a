use std::path::Path;

use anyhow::Context;

use crate::config::Config;
use crate::processors::ledger;

pub fn process(config: &Config, input_path: &Path) -> anyhow::Result<()> {
    let data = std::fs::read(input_path).with_context(|| format!("Could not read {}", input_path.display()))?;

    if data.len() != config.ledger.page_size {
        log::warn!(
            "Dump of {} bytes, expected a page of {}",
            data.len(),
            config.ledger.page_size
        );
    }

    let page = ledger::decode(&data, &config.ledger.bounds())?;
    println!("{page}");
    Ok(())
}
