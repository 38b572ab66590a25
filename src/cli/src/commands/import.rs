//! `modelmirror import` command.

use clap::Args;
use tokio_util::io::ReaderStream;

use modelmirror_core::services::ByteStream;
use modelmirror_runtime::ImportService;

use super::GlobalArgs;
use crate::output;

#[derive(Args)]
pub struct ImportArgs {
    /// Archive path, or an http(s) URL to stream it from
    pub source: String,

    /// Print the import result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ImportArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let workspace = global.workspace()?;
    let service = ImportService::new(workspace.context(global.config()?)?);
    let user = global.user();

    let information = if is_url(&args.source) {
        service.import_from_url(&user, &args.source).await?
    } else {
        let file = tokio::fs::File::open(&args.source)
            .await
            .map_err(|e| format!("failed to open {}: {e}", args.source))?;
        let source: ByteStream = Box::pin(ReaderStream::new(file));
        service.import_from_stream(&user, source).await?
    };

    workspace.save()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&information)?);
        return Ok(());
    }

    let mut table = output::new_table(&["FIELD", "VALUE"]);
    for (field, value) in output::information_rows(&information) {
        table.add_row(vec![field, value]);
    }
    println!("{table}");
    Ok(())
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}
