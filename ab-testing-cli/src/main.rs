mod loader;
mod output;

use std::path::PathBuf;

use ab_testing::config::DEFAULT_HASH_SALT;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::output::OutputFormat;

/// Result type for operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Errors that can occur while processing definition files
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Unknown test: {0}")]
    UnknownTest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error in {path}: {source}")]
    YamlParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Schema validation error: {0}")]
    Schema(#[from] ab_testing_validation::ValidationError),

    #[error("Invalid test definition: {0}")]
    Config(#[from] ab_testing::ConfigurationError),
}

#[derive(Parser, Debug)]
#[command(name = "ab-testing")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate every definition file under the root directory
    Validate {
        #[arg(long, env = "AB_TESTING_DIR", help = "root directory of the definitions")]
        root: String,
    },
    /// Validate, then write all definitions to one JSON bundle
    Bundle {
        #[arg(long, env = "AB_TESTING_DIR", help = "root directory of the definitions")]
        root: String,

        #[arg(long, help = "path of the bundle file to write")]
        out: PathBuf,
    },
    /// Show how one subject is bucketed into one test
    Assign {
        #[arg(long, env = "AB_TESTING_DIR", help = "root directory of the definitions")]
        root: String,

        #[arg(long, help = "test id")]
        test: String,

        #[arg(long, help = "subject id (user or session id)")]
        subject: String,

        #[arg(long, env = "AB_TESTING_HASH_SALT", default_value = DEFAULT_HASH_SALT)]
        salt: String,

        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },
    /// Bucket a synthetic population and report the variant distribution
    Simulate {
        #[arg(long, env = "AB_TESTING_DIR", help = "root directory of the definitions")]
        root: String,

        #[arg(long, help = "test id")]
        test: String,

        #[arg(long, default_value_t = 10_000, help = "number of synthetic subjects")]
        subjects: usize,

        #[arg(long, env = "AB_TESTING_HASH_SALT", default_value = DEFAULT_HASH_SALT)]
        salt: String,

        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Validate { root } => {
            let catalog = loader::load_catalog(&root)?;
            info!(tests = catalog.tests.len(), "definitions valid");
            println!("{} test definitions valid", catalog.tests.len());
        }
        Command::Bundle { root, out } => {
            let catalog = loader::load_catalog(&root)?;
            let written = output::write_bundle(&out, &catalog)?;
            info!(tests = written, out = %out.display(), "bundle written");
        }
        Command::Assign {
            root,
            test,
            subject,
            salt,
            format,
        } => {
            let catalog = loader::load_catalog(&root)?;
            let report = output::assign(catalog.test(&test)?, &subject, &salt);
            print!("{}", output::render_assign(&report, format)?);
        }
        Command::Simulate {
            root,
            test,
            subjects,
            salt,
            format,
        } => {
            let catalog = loader::load_catalog(&root)?;
            let report = output::simulate(catalog.test(&test)?, subjects, &salt);
            print!("{}", output::render_simulation(&report, format)?);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::fs;
    use tempfile::TempDir;

    const PROMO: &str = "experiments:
  - id: promo-banner
    name: Promo banner
    status: running
    trafficAllocation: 100
    variants:
      - id: A
        name: Control
        weight: 50
        isControl: true
      - id: B
        name: Bold
        weight: 50
        config:
          color: red
";

    fn root_with_promo() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("promo.yaml"), PROMO).unwrap();
        dir
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ab-testing").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["simulate", "--root", "defs", "--test", "t"]);
        match cli.command {
            Command::Simulate {
                subjects,
                salt,
                format,
                ..
            } => {
                assert_eq!(subjects, 10_000);
                assert_eq!(salt, DEFAULT_HASH_SALT);
                assert_eq!(format, OutputFormat::Text);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_validate_command() {
        let dir = root_with_promo();
        let root = dir.path().to_str().unwrap();
        assert!(run(parse(&["validate", "--root", root])).is_ok());
    }

    #[test]
    fn test_bundle_command() {
        let dir = root_with_promo();
        let root = dir.path().to_str().unwrap();
        let out = dir.path().join("out/bundle.json");
        run(parse(&["bundle", "--root", root, "--out", out.to_str().unwrap()])).unwrap();

        let bundle: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(bundle[0]["id"], "promo-banner");
        assert_eq!(bundle[0]["variants"][1]["config"]["color"], "red");
    }

    #[test]
    fn test_assign_unknown_test() {
        let dir = root_with_promo();
        let root = dir.path().to_str().unwrap();
        let result = run(parse(&[
            "assign", "--root", root, "--test", "missing", "--subject", "u1",
        ]));
        assert!(matches!(result, Err(AppError::UnknownTest(_))));
    }
}
