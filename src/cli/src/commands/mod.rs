//! CLI command definitions and dispatch.

mod export;
mod import;
mod inspect;
mod models;
mod version;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use modelmirror_core::model::User;

use crate::state::{load_config, Workspace};

/// Default state directory, relative to the working directory.
const DEFAULT_STATE_DIR: &str = ".modelmirror";

/// Model Mirror: move model documents, files and images between deployments.
#[derive(Parser)]
#[command(name = "modelmirror", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Mirror configuration file (YAML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// State directory holding state.json and objects/
    #[arg(long, global = true, default_value = DEFAULT_STATE_DIR)]
    pub state: PathBuf,

    /// Distinguished name of the acting user
    #[arg(long, global = true, default_value = "CN=local")]
    pub user: String,
}

impl GlobalArgs {
    pub(crate) fn user(&self) -> User {
        User::new(self.user.clone())
    }

    pub(crate) fn workspace(&self) -> Result<Workspace, Box<dyn std::error::Error>> {
        Workspace::open(&self.state)
    }

    pub(crate) fn config(
        &self,
    ) -> Result<modelmirror_core::MirrorConfig, Box<dyn std::error::Error>> {
        load_config(self.config.as_deref())
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Export a model's documents, one of its files or one of its images
    Export(export::ExportArgs),
    /// Import a mirror archive from a file or URL
    Import(import::ImportArgs),
    /// List the entries and metadata of a mirror archive
    Inspect(inspect::InspectArgs),
    /// List models in the state directory
    Models(models::ModelsArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let global = cli.global;
    match cli.command {
        Command::Export(args) => export::execute(args, &global).await,
        Command::Import(args) => import::execute(args, &global).await,
        Command::Inspect(args) => inspect::execute(args, &global).await,
        Command::Models(args) => models::execute(args, &global).await,
        Command::Version(args) => version::execute(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export_documents() {
        let cli = Cli::try_parse_from([
            "modelmirror",
            "export",
            "model-a",
            "--release",
            "1.0.0",
            "-r",
            "1.1.0",
        ])
        .unwrap();
        assert_eq!(cli.global.state, PathBuf::from(DEFAULT_STATE_DIR));
        assert_eq!(cli.global.user, "CN=local");
        match cli.command {
            Command::Export(args) => {
                assert_eq!(args.model, "model-a");
                assert_eq!(args.releases, vec!["1.0.0", "1.1.0"]);
                assert!(args.file.is_none());
            }
            _ => panic!("expected export"),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "modelmirror",
            "import",
            "archive.tar.gz",
            "--state",
            "/tmp/mirror",
            "--user",
            "CN=bob",
            "--config",
            "mirror.yaml",
        ])
        .unwrap();
        assert_eq!(cli.global.state, PathBuf::from("/tmp/mirror"));
        assert_eq!(cli.global.user, "CN=bob");
        assert_eq!(cli.global.config, Some(PathBuf::from("mirror.yaml")));
        assert!(matches!(cli.command, Command::Import(_)));
    }

    #[test]
    fn test_parse_export_file_conflicts_with_release() {
        let result = Cli::try_parse_from([
            "modelmirror",
            "export",
            "model-a",
            "--file",
            "f1",
            "--release",
            "1.0.0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_inspect_requires_source() {
        assert!(Cli::try_parse_from(["modelmirror", "inspect"]).is_err());
    }
}
