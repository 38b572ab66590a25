//! `modelmirror models` command.

use clap::Args;

use super::GlobalArgs;
use crate::output;

#[derive(Args)]
pub struct ModelsArgs {
    /// Print the whole state snapshot as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ModelsArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let workspace = global.workspace()?;
    let snapshot = workspace.deployment().snapshot();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let mut table = output::new_table(&["MODEL", "NAME", "CARD", "RELEASES", "MIRRORS", "MIRRORED TO"]);
    for model in &snapshot.models {
        let releases = snapshot
            .releases
            .iter()
            .filter(|release| release.model_id == model.id)
            .count();
        let mirror = &model.settings.mirror;
        table.add_row(vec![
            model.id.clone(),
            model.name.clone(),
            model
                .card
                .as_ref()
                .map(|card| format!("v{}", card.version))
                .unwrap_or_else(|| "-".to_string()),
            releases.to_string(),
            mirror.source_model_id.clone().unwrap_or_else(|| "-".to_string()),
            mirror
                .destination_model_id
                .clone()
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}
