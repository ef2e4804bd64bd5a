use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub use crate::config::Config;

pub mod commands;
mod config;
pub mod processors;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "./ota.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub commands: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the program size and CRC into an image
    Stamp(StampArguments),
    /// Show the metadata of an image and check its CRC
    Inspect {
        /// Image file path (BIN)
        #[arg(short, long, value_name = "INPUT_FILE")]
        input_path: PathBuf,
    },
    /// Decode a dump of the ledger page
    Ledger {
        /// Page dump file path (BIN)
        #[arg(short, long, value_name = "INPUT_FILE")]
        input_path: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct StampArguments {
    /// Input file path (ELF or BIN)
    #[arg(short, long, value_name = "INPUT_FILE")]
    pub input_path: PathBuf,
    /// Output file path (BIN) [default: <INPUT_FILE>.stamped.bin]
    #[arg(short, long, value_name = "OUTPUT_FILE")]
    pub output_path: Option<PathBuf>,
    /// Leave the shadow CRC erased, for images delivered over the air
    ///
    /// Without this flag the image is marked verified, as needed when it is flashed directly.
    #[arg(long)]
    pub ota: bool,
    /// Manufacturer id to put in the preamble
    #[arg(long, value_parser = parse_u16)]
    pub manufacturer_id: Option<u16>,
    /// Image type to put in the preamble
    #[arg(long, value_parser = parse_u16)]
    pub image_type: Option<u16>,
    /// Image version to put in the preamble
    ///
    /// The top two bits select the device role, the lowest bit marks an image linked for area B.
    #[arg(long, value_parser = parse_u32)]
    pub image_version: Option<u32>,
}

impl StampArguments {
    pub fn output_path_with_default(&self) -> PathBuf {
        self.output_path
            .clone()
            .unwrap_or_else(|| self.input_path.clone().with_extension("stamped.bin"))
    }
}

fn parse_u32(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let value = parse_u32(s).map_err(|e| e.to_string())?;
    u16::try_from(value).map_err(|e| e.to_string())
}
