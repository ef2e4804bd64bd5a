use std::path::Path;

use anyhow::Context;

use crate::config::Config;
use crate::processors::image;

pub fn process(config: &Config, input_path: &Path) -> anyhow::Result<()> {
    let data = std::fs::read(input_path).with_context(|| format!("Could not read {}", input_path.display()))?;

    let report = image::inspect(&data, &config.image.layout(), &config.ledger.bounds())?;
    println!("{report}");

    if !report.crc_matches() {
        anyhow::bail!("CRC of {} does not match", input_path.display());
    }
    Ok(())
}
