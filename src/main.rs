pub mod config;
pub mod repository;

use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use config::{CapstanConfig, ROOT_ENV};
use repository::{listing::FileInfo, Hypervisor, ImportOptions, Repository};
use thiserror::Error;
use tracing::{debug, error, trace, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    version = "0.1",
    about = "Local repository of unikernel disk images"
)]
pub struct CapstanOpts {
    /// Config file path
    #[clap(short, long)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a disk image into the repository
    Import {
        /// Image name, optionally namespaced (e.g. cloudius/osv)
        name: String,
        /// QCOW2, VDI or VMDK disk image
        file: PathBuf,
        #[clap(long, default_value = "")]
        image_version: String,
        /// Creation time, defaults to now
        #[clap(long)]
        created: Option<String>,
        #[clap(long, default_value = "")]
        description: String,
        #[clap(long, default_value = "")]
        build: String,
    },
    /// List images in the repository
    List,
    /// Remove an image and all its hypervisor variants
    Rm { name: String },
    /// Print where an image is stored
    Path { hypervisor: Hypervisor, name: String },
    /// Check whether an image is stored for a hypervisor
    Exists { hypervisor: Hypervisor, name: String },
    /// Print the image name inferred from the Capstanfile in the current directory
    Default,
    /// Print the metadata of an image
    Info { name: String },
}

#[derive(Error, Debug)]
pub enum CapstanError {
    #[error(transparent)]
    Repository(#[from] repository::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = CapstanOpts::parse();

    match run(options) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(options: CapstanOpts) -> Result<ExitCode, CapstanError> {
    let config = match options.config.as_deref() {
        Some(path) => {
            debug!("loading config file at {}", path.display());
            let config = CapstanConfig::load(path)?;
            trace!(
                "config file loaded successfully with content: {:#?}",
                config
            );
            Some(config)
        }
        None => None,
    };

    let root = config::resolve_root(std::env::var(ROOT_ENV).ok(), config.as_ref())?;
    debug!("repository root is {}", root.display());
    let repo = Repository::new(root);

    match options.command {
        Command::Import {
            name,
            file,
            image_version,
            created,
            description,
            build,
        } => {
            let options = ImportOptions {
                version: image_version,
                created: created.unwrap_or_else(|| {
                    chrono::Local::now().format("%Y-%m-%d %H:%M").to_string()
                }),
                description,
                build,
            };
            repo.import_image(&name, &file, &options)?;
        }
        Command::List => {
            let listing = repo.list_images();
            println!("{}", FileInfo::header());
            for line in listing.lines() {
                println!("{}", line);
            }
            for warning in &listing.warnings {
                warn!("{}", warning);
            }
        }
        Command::Rm { name } => {
            repo.remove_image(&name)?;
        }
        Command::Path { hypervisor, name } => {
            println!("{}", repo.image_path(hypervisor, &name).display());
        }
        Command::Exists { hypervisor, name } => {
            return match repo.image_status(hypervisor, &name) {
                repository::ImageStatus::Present => Ok(ExitCode::SUCCESS),
                repository::ImageStatus::Absent => Ok(ExitCode::from(1)),
                repository::ImageStatus::Inaccessible(e) => {
                    error!("cannot access image {}: {}", name, e);
                    Ok(ExitCode::from(2))
                }
            };
        }
        Command::Default => match repository::default_image() {
            Some(name) => println!("{}", name),
            None => debug!("no Capstanfile in the current directory"),
        },
        Command::Info { name } => {
            let record = repo.image_record(&name)?;
            let content = record.to_yaml().map_err(repository::Error::Serialize)?;
            print!("{}", content);
        }
    }

    Ok(ExitCode::SUCCESS)
}
