use anyhow::Context;
use object::read::elf::ElfFile32;

use crate::StampArguments;
use crate::config::Config;
use crate::processors::image::{self, Identity};
use crate::processors::objcopy;

/// Stamp the input image and write the result next to it, unless told otherwise.
pub fn process(config: &Config, args: StampArguments) -> anyhow::Result<()> {
    let input = std::fs::read(&args.input_path)
        .with_context(|| format!("Could not read {}", args.input_path.display()))?;

    let data = if objcopy::is_elf(&input) {
        let file = ElfFile32::parse(input.as_slice()).context("Could not parse ELF")?;
        objcopy::objcopy(&file, config.image.base)?
    } else {
        input
    };

    let identity = Identity {
        manufacturer_id: args.manufacturer_id,
        image_type: args.image_type,
        image_version: args.image_version,
    };
    let stamped = image::stamp(data, &config.image.layout(), identity, args.ota)?;

    if stamped.len() > config.image.capacity as usize {
        anyhow::bail!(
            "Image of 0x{:x} bytes exceeds the download capacity of 0x{:x}",
            stamped.len(),
            config.image.capacity
        );
    }

    let output_path = args.output_path_with_default();
    std::fs::write(&output_path, &stamped)
        .with_context(|| format!("Could not write {}", output_path.display()))?;

    log::info!("Written {}", output_path.display());
    Ok(())
}
