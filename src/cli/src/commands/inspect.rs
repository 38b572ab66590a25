//! `modelmirror inspect` command.

use clap::Args;
use tokio_util::io::ReaderStream;

use modelmirror_core::metadata::MirrorMetadata;
use modelmirror_core::services::ByteStream;
use modelmirror_runtime::{create_unpack_stream, list_entries, EntryKind, UnpackEvent};

use super::GlobalArgs;
use crate::output;

#[derive(Args)]
pub struct InspectArgs {
    /// Archive path
    pub archive: String,
}

pub async fn execute(args: InspectArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = global.config()?;

    let entries = list_entries(open(&args.archive).await?, &config.archive).await?;

    let mut table = output::new_table(&["PATH", "TYPE", "SIZE"]);
    for (path, kind, size) in &entries {
        table.add_row(vec![
            path.clone(),
            output::format_entry_kind(*kind).to_string(),
            output::format_bytes(*size),
        ]);
    }
    println!("{table}");

    let has_metadata = entries.iter().any(|(path, kind, _)| {
        *kind == EntryKind::File && path.trim_start_matches("./") == config.metadata_file
    });
    if has_metadata {
        let metadata = read_metadata(&args.archive, &config.metadata_file, &config).await?;
        println!();
        println!("{}", serde_json::to_string_pretty(&metadata)?);
    } else {
        println!();
        println!("No '{}' entry found", config.metadata_file);
    }
    Ok(())
}

async fn open(path: &str) -> Result<ByteStream, Box<dyn std::error::Error>> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| format!("failed to open {path}: {e}"))?;
    Ok(Box::pin(ReaderStream::new(file)))
}

/// Read the metadata entry in a second pass over the archive.
async fn read_metadata(
    path: &str,
    metadata_file: &str,
    config: &modelmirror_core::MirrorConfig,
) -> Result<MirrorMetadata, Box<dyn std::error::Error>> {
    let (mut events, _worker) = create_unpack_stream(open(path).await?, &config.archive);
    while let Some(event) = events.recv().await {
        match event {
            UnpackEvent::Entry { entry, next } => {
                if entry.path.trim_start_matches("./") == metadata_file {
                    let raw = entry
                        .body
                        .read_to_end(config.import.max_metadata_size)
                        .await?;
                    return Ok(MirrorMetadata::from_slice(&raw)?);
                }
                drop(entry);
                let _ = next.send(());
            }
            UnpackEvent::Finished => break,
            UnpackEvent::Failed(e) => return Err(e.into()),
        }
    }
    Err(format!("no '{metadata_file}' entry found").into())
}
