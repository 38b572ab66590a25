//! `modelmirror export` command.

use chrono::Utc;
use clap::Args;

use modelmirror_core::model::ImageRef;
use modelmirror_queue::QueueManagerBuilder;
use modelmirror_runtime::export::{
    file_key, image_key, ExportService, Exporter, FileExport, ImageExport,
};
use modelmirror_runtime::MirrorContext;

use super::GlobalArgs;
use crate::output;

#[derive(Args)]
pub struct ExportArgs {
    /// Source model id
    pub model: String,

    /// Release to include (repeatable)
    #[arg(short = 'r', long = "release")]
    pub releases: Vec<String>,

    /// Export the content of a single file instead of documents
    #[arg(long, conflicts_with_all = ["releases", "image"])]
    pub file: Option<String>,

    /// Export a single image, given as `name:tag`
    #[arg(long, conflicts_with = "releases")]
    pub image: Option<String>,
}

pub async fn execute(args: ExportArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let workspace = global.workspace()?;
    let ctx = workspace.context(global.config()?)?;

    if let Some(file_id) = args.file {
        let key = file_key(&export_id(), &file_id);
        let exporter = Exporter::new(
            ctx.clone(),
            global.user(),
            key.clone(),
            FileExport::new(&args.model, file_id),
        );
        let size = exporter.run().await?;
        print_archive(&ctx, &key, size);
        return Ok(());
    }

    if let Some(image) = args.image {
        let image = parse_image(&args.model, &image)?;
        let key = image_key(&export_id(), &image);
        let exporter = Exporter::new(
            ctx.clone(),
            global.user(),
            key.clone(),
            ImageExport::new(&args.model, image),
        );
        let size = exporter.run().await?;
        print_archive(&ctx, &key, size);
        return Ok(());
    }

    export_documents(ctx, global, &args.model, args.releases).await
}

/// Export documents, then every follow-up file and image, through the queue.
async fn export_documents(
    ctx: MirrorContext,
    global: &GlobalArgs,
    model_id: &str,
    releases: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = QueueManagerBuilder::new()
        .with_config(&ctx.config.queue)
        .build()?;
    manager.start()?;

    let service = ExportService::new(ctx.clone(), manager.queue());
    let export_id = service
        .export_model(&global.user(), model_id, releases)
        .await?;
    manager.wait_idle().await;
    manager.stop();

    let mut table = output::new_table(&["JOB", "TYPE", "STATE", "ELAPSED"]);
    for job in manager.queue().jobs() {
        table.add_row(vec![
            job.id.chars().take(8).collect::<String>(),
            job.job_type.clone(),
            output::format_job_state(&job.state),
            output::format_elapsed(job.started_at, job.finished_at),
        ]);
    }
    println!("{table}");
    println!(
        "Export {export_id} written to bucket '{}'",
        ctx.config.export.bucket
    );

    let failed = manager.failed_jobs().len();
    if failed > 0 {
        return Err(format!("{failed} export job(s) failed").into());
    }
    Ok(())
}

fn print_archive(ctx: &MirrorContext, key: &str, size: u64) {
    println!(
        "Wrote {}/{} ({})",
        ctx.config.export.bucket,
        key,
        output::format_bytes(size)
    );
}

/// Archive ids for single-item exports.
fn export_id() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%3f").to_string()
}

/// Parse `name:tag` into an image owned by `model_id`.
fn parse_image(model_id: &str, image: &str) -> Result<ImageRef, String> {
    match image.rsplit_once(':') {
        Some((name, tag)) if !name.is_empty() && !tag.is_empty() && !tag.contains('/') => {
            Ok(ImageRef {
                repository: model_id.to_string(),
                name: name.to_string(),
                tag: tag.to_string(),
            })
        }
        _ => Err(format!("invalid image '{image}', expected name:tag")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image() {
        let image = parse_image("m1", "tools/app:v1").unwrap();
        assert_eq!(image.repository, "m1");
        assert_eq!(image.name, "tools/app");
        assert_eq!(image.tag, "v1");
    }

    #[test]
    fn test_parse_image_invalid() {
        assert!(parse_image("m1", "app").is_err());
        assert!(parse_image("m1", "app:").is_err());
        assert!(parse_image("m1", ":v1").is_err());
    }

    #[test]
    fn test_export_id_is_sortable() {
        let id = export_id();
        assert_eq!(id.len(), "20240101T000000000".len());
    }
}
