use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use depot::error::Error;
use depot::lock::process_uid;
use depot::repo::Depot;
use depot::types::{ArtifactSpec, ListRange};

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "A lifecycle-gated artifact repository", long_about = None)]
struct Cli {
    /// Path to the depot root directory
    #[arg(long, default_value = "./depot")]
    root: PathBuf,

    /// Acting user id (defaults to the process uid)
    #[arg(long)]
    uid: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialise a new depot at the root path
    Init {
        /// Name recorded for the owning user
        #[arg(long)]
        owner_name: Option<String>,
    },

    /// Fileset commands
    Fileset {
        #[command(subcommand)]
        command: FilesetCommands,
    },

    /// Artifact commands
    Artifact {
        #[command(subcommand)]
        command: ArtifactCommands,
    },

    /// Attach a tag to a fileset or artifact
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },

    /// Attach or update a property on a fileset or artifact
    Prop {
        #[command(subcommand)]
        command: PropCommands,
    },
}

#[derive(Subcommand)]
enum FilesetCommands {
    /// Add a new fileset
    Add {
        /// Fileset name
        name: String,

        /// Version of the build being added
        #[arg(short = 'V', long)]
        version: String,

        /// Revision of the build (tip commit id, tag, ...)
        #[arg(short, long)]
        revision: String,
    },

    /// List filesets
    List {
        /// List entries with an id greater than this
        #[arg(long)]
        start_at: Option<i64>,

        /// Maximum number of entries to list
        #[arg(long)]
        count: Option<u32>,

        /// Emit JSON instead of columns
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ArtifactCommands {
    /// Add a new artifact to a fileset
    Add {
        /// Name of the fileset receiving this artifact
        #[arg(short, long)]
        fileset: String,

        /// File to copy into the store
        #[arg(short, long)]
        source_file: PathBuf,

        /// Name of the artifact in the depot
        #[arg(short, long)]
        name: String,

        /// Path to the artifact below the depot root
        #[arg(short, long)]
        path: String,

        /// Origin of this artifact (normally a build host or server)
        #[arg(short, long)]
        origin: String,

        /// Mark this artifact as auxiliary rather than primary
        #[arg(short, long)]
        auxiliary: bool,
    },

    /// List artifacts
    List {
        /// Give a longer listing
        #[arg(short, long)]
        long: bool,

        /// List entries with an id greater than this
        #[arg(long)]
        start_at: Option<i64>,

        /// Maximum number of entries to list
        #[arg(long)]
        count: Option<u32>,

        /// Emit JSON instead of columns
        #[arg(long)]
        json: bool,
    },

    /// Copy an artifact's bytes out of the store
    Get {
        /// Artifact id
        #[arg(short, long)]
        id: i64,

        /// Destination path; must not exist
        #[arg(short, long)]
        dest: PathBuf,
    },

    /// Move an artifact to a new lifecycle state
    Transit {
        /// Artifact id
        #[arg(short, long)]
        id: i64,

        /// Requested state
        #[arg(short, long)]
        state: String,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    /// Tag a fileset
    Fileset {
        /// Fileset id
        #[arg(long)]
        id: i64,

        /// Tag to attach
        tag: String,
    },

    /// Tag an artifact
    Artifact {
        /// Artifact id
        #[arg(long)]
        id: i64,

        /// Tag to attach
        tag: String,
    },
}

#[derive(Subcommand)]
enum PropCommands {
    /// Set a property on a fileset
    Fileset {
        /// Fileset id
        #[arg(long)]
        id: i64,

        /// Property name
        name: String,

        /// Property value
        value: String,

        /// Rewrite the value if the property already exists
        #[arg(long)]
        update: bool,
    },

    /// Set a property on an artifact
    Artifact {
        /// Artifact id
        #[arg(long)]
        id: i64,

        /// Property name
        name: String,

        /// Property value
        value: String,

        /// Rewrite the value if the property already exists
        #[arg(long)]
        update: bool,
    },
}

fn default_owner_name() -> String {
    std::env::var("USER").unwrap_or_else(|_| "owner".to_string())
}

fn run_fileset(depot: &Depot, uid: i64, command: FilesetCommands) -> anyhow::Result<()> {
    match command {
        FilesetCommands::Add {
            name,
            version,
            revision,
        } => match depot.add_fileset(uid, &name, &version, &revision) {
            Ok(fileset) => println!("added fileset '{}' with id {}", fileset.name, fileset.id),
            Err(Error::FilesetExists(name)) => bail!("fileset '{name}' already exists"),
            Err(e) => return Err(e.into()),
        },
        FilesetCommands::List {
            start_at,
            count,
            json,
        } => {
            let filesets = depot.list_filesets(uid, &ListRange { start_at, count })?;
            if json {
                println!("{}", serde_json::to_string_pretty(&filesets)?);
            } else {
                for fs in filesets {
                    println!(
                        "{:>6} {:>10} {:>10} {}",
                        fs.id, fs.version, fs.revision, fs.name
                    );
                }
            }
        }
    }
    Ok(())
}

fn run_artifact(depot: &Depot, uid: i64, command: ArtifactCommands) -> anyhow::Result<()> {
    match command {
        ArtifactCommands::Add {
            fileset,
            source_file,
            name,
            path,
            origin,
            auxiliary,
        } => {
            let Some(fileset) = depot.find_fileset(uid, &fileset)? else {
                bail!("failed to add artifact, fileset '{fileset}' not found");
            };
            let spec = ArtifactSpec {
                fileset_id: fileset.id,
                name,
                path,
                is_primary: !auxiliary,
                source: origin,
            };
            let artifact = depot.add_artifact(uid, &spec, &source_file)?;
            println!(
                "added artifact {}/{} with id {}",
                artifact.path, artifact.name, artifact.id
            );
        }
        ArtifactCommands::List {
            long,
            start_at,
            count,
            json,
        } => {
            let artifacts = depot.list_artifacts(uid, &ListRange { start_at, count })?;
            if json {
                println!("{}", serde_json::to_string_pretty(&artifacts)?);
            } else {
                for artifact in artifacts {
                    let state = depot.state_name(artifact.state_id).unwrap_or("?");
                    if long {
                        println!(
                            "{:>10}/{:<10} {}/{}\n{} {}\ncksum: {}\n--",
                            artifact.fileset_id,
                            artifact.id,
                            artifact.path,
                            artifact.name,
                            state,
                            if artifact.is_primary { "" } else { "auxiliary" },
                            artifact.checksum
                        );
                    } else {
                        println!(
                            "{:>6} {:>10} {:>10} {} {}/{}",
                            artifact.fileset_id,
                            artifact.id,
                            state,
                            if artifact.is_primary { "P" } else { "A" },
                            artifact.path,
                            artifact.name
                        );
                    }
                }
            }
        }
        ArtifactCommands::Get { id, dest } => match depot.get_artifact(uid, id, &dest) {
            Ok(()) => println!("retrieved artifact {} to {}", id, dest.display()),
            Err(Error::ArtifactNotFound(id)) => bail!("artifact id {id} cannot be found"),
            Err(Error::DestinationExists(path)) => {
                bail!("destination {} already exists", path.display())
            }
            Err(e) => return Err(e.into()),
        },
        ArtifactCommands::Transit { id, state } => {
            match depot.transit_artifact(uid, id, &state) {
                Ok(artifact) => {
                    let name = depot.state_name(artifact.state_id).unwrap_or(&state);
                    println!("artifact {} is now {}", artifact.id, name);
                }
                Err(Error::InvalidState(state)) => {
                    bail!("requested state '{state}' is not recognised")
                }
                Err(Error::ArtifactNotFound(id)) => bail!("artifact id {id} cannot be found"),
                Err(Error::InvalidTargetForStateChange) => {
                    bail!("attempted to change state on an auxiliary artifact")
                }
                Err(Error::InvalidTransition { from, to }) => {
                    bail!("the transition from '{from}' to '{to}' is not permitted")
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

fn run_tag(depot: &Depot, uid: i64, command: TagCommands) -> anyhow::Result<()> {
    match command {
        TagCommands::Fileset { id, tag } => {
            depot.tag_fileset(uid, id, &tag)?;
            println!("tagged fileset {id} with '{tag}'");
        }
        TagCommands::Artifact { id, tag } => {
            depot.tag_artifact(uid, id, &tag)?;
            println!("tagged artifact {id} with '{tag}'");
        }
    }
    Ok(())
}

fn run_prop(depot: &Depot, uid: i64, command: PropCommands) -> anyhow::Result<()> {
    match command {
        PropCommands::Fileset {
            id,
            name,
            value,
            update,
        } => {
            depot.set_fileset_property(uid, id, &name, &value, update)?;
            println!("set property '{name}' on fileset {id}");
        }
        PropCommands::Artifact {
            id,
            name,
            value,
            update,
        } => {
            depot.set_artifact_property(uid, id, &name, &value, update)?;
            println!("set property '{name}' on artifact {id}");
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("depot=warn".parse()?))
        .init();

    let cli = Cli::parse();
    let uid = cli.uid.unwrap_or_else(process_uid);

    match cli.command {
        Commands::Init { owner_name } => {
            let owner_name = owner_name.unwrap_or_else(default_owner_name);
            match Depot::init(&cli.root, uid, &owner_name) {
                Ok(()) => {
                    println!("initialised depot at {}", cli.root.display());
                    Ok(())
                }
                Err(Error::AlreadyExists) => {
                    bail!(
                        "cannot initialise the depot because {} already exists",
                        cli.root.display()
                    );
                }
                Err(e) => Err(e.into()),
            }
        }
        command => {
            let depot = Depot::open(&cli.root)?;
            let result = match command {
                Commands::Init { .. } => unreachable!("handled above"),
                Commands::Fileset { command } => run_fileset(&depot, uid, command),
                Commands::Artifact { command } => run_artifact(&depot, uid, command),
                Commands::Tag { command } => run_tag(&depot, uid, command),
                Commands::Prop { command } => run_prop(&depot, uid, command),
            };
            depot.close()?;
            result
        }
    }
}
