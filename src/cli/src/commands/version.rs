//! `modelmirror version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs {}

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("modelmirror version {}", modelmirror_core::VERSION);
    println!("runtime {}", modelmirror_runtime::VERSION);
    Ok(())
}
