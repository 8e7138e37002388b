use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::bail;
use ballot_core::{
    admin::{AdminGate, ImageSource, ParticipantDraft},
    catalog::{load_catalog, CategoryEntry},
    config::Config,
    data::{CategoryId, ParticipantId, Table},
    gateway::{rest::RestGateway, ImageUpload},
    probe::ConnectivityProbe,
    realtime::RealtimeRefresh,
    submit::Ballot,
    tally::{fetch_tally, Tally},
    voter::VoterStore,
    Error,
};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const ADMIN_ATTEMPT_VAR: &str = "BALLOT_ADMIN_ATTEMPT";

#[derive(Parser)]
#[command(name = "ballot")]
#[command(about = "Vote on the awards and follow the results")]
struct Cli {
    /// Log more; repeat for even more. RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the backend is configured and reachable
    Status,
    /// List the categories and their participants
    Catalog,
    /// Vote for one participant in each of some categories
    Vote {
        /// A vote, as <category-id>=<participant-id>
        #[arg(long = "pick", value_parser = parse_pick, required = true)]
        picks: Vec<(CategoryId, ParticipantId)>,
    },
    /// Show the vote counts of every category
    Results {
        /// Print the results again whenever something changes
        #[arg(long)]
        watch: bool,
        /// Tables whose changes trigger a reprint; all three by default
        #[arg(long, value_delimiter = ',', value_parser = parse_table)]
        tables: Vec<Table>,
    },
    /// Manage categories and participants
    Admin {
        #[arg(long, env = ADMIN_ATTEMPT_VAR, hide_env_values = true)]
        password: String,
        #[command(subcommand)]
        command: AdminCommand,
    },
}

#[derive(Subcommand)]
enum AdminCommand {
    AddCategory {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    RemoveCategory {
        id: String,
    },
    AddParticipant {
        #[arg(long)]
        category: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, conflicts_with = "image_file")]
        image_url: Option<String>,
        /// An image to upload, at most 5 MiB
        #[arg(long)]
        image_file: Option<PathBuf>,
    },
    RemoveParticipant {
        id: String,
    },
    /// Count categories, participants and votes
    Stats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            if let Some(hint) = e.downcast_ref::<Error>().and_then(Error::remediation) {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status => status().await,
        Command::Catalog => {
            let (_, gateway) = connect_from_env()?;
            print_catalog(&load_catalog(&gateway).await?);
            Ok(())
        }
        Command::Vote { picks } => {
            let (config, gateway) = connect_from_env()?;
            vote(&config, &gateway, picks).await
        }
        Command::Results { watch: false, .. } => {
            let (_, gateway) = connect_from_env()?;
            print_tally(&fetch_tally(&gateway).await?);
            Ok(())
        }
        Command::Results {
            watch: true,
            tables,
        } => {
            let (_, gateway) = connect_from_env()?;
            watch_results(&gateway, tables).await
        }
        Command::Admin { password, command } => {
            let (config, gateway) = connect_from_env()?;
            admin(&config, &gateway, &password, command).await
        }
    }
}

fn connect_from_env() -> Result<(Config, RestGateway), Error> {
    let config = Config::from_env()?;
    let gateway = connect(&config)?;
    Ok((config, gateway))
}

fn connect(config: &Config) -> Result<RestGateway, Error> {
    let gateway = RestGateway::new(&config.url, &config.public_key, config.poll_interval)?;
    info!(url = %config.url, "using backend");
    Ok(gateway)
}

async fn status() -> anyhow::Result<()> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            let mut probe = ConnectivityProbe::new(Default::default());
            probe.fail_configuration(&e);
            if let Some(banner) = probe.banner() {
                println!("{banner}");
            }
            return Err(Error::from(e).into());
        }
    };

    let gateway = connect(&config)?;
    let mut probe = ConnectivityProbe::new(config.probe);
    let state = probe.run(&gateway).await;
    match state.banner() {
        None => {
            println!("ready");
            Ok(())
        }
        Some(banner) => bail!("{banner}"),
    }
}

async fn vote(
    config: &Config,
    gateway: &RestGateway,
    picks: Vec<(CategoryId, ParticipantId)>,
) -> anyhow::Result<()> {
    let store = match &config.voter_id_file {
        Some(path) => VoterStore::new(path),
        None => VoterStore::default_location().map_err(Error::from)?,
    };
    let voter = store.load_or_create().map_err(Error::from)?;

    let mut ballot = Ballot::new();
    for (category, participant) in picks {
        ballot.select(category, participant).map_err(Error::from)?;
    }
    let recorded = ballot.submit(gateway, &voter, config.vote_strategy).await?;
    println!("Recorded {recorded} vote(s) as {voter}.");
    Ok(())
}

async fn watch_results(gateway: &RestGateway, tables: Vec<Table>) -> anyhow::Result<()> {
    let tables = if tables.is_empty() {
        Table::ALL.to_vec()
    } else {
        tables
    };
    let mut refresh = RealtimeRefresh::mount(gateway, &tables).await;
    print_tally(&refresh.refresh().await?.tally);
    if !refresh.is_live() {
        bail!("live updates are unavailable, showing the results once");
    }

    while let Some(snapshot) = refresh.next_snapshot().await {
        match snapshot {
            Ok(snapshot) => {
                println!();
                print_tally(&snapshot.tally);
            }
            Err(e) => warn!(error = %e, "could not refresh the results"),
        }
    }
    Ok(())
}

async fn admin(
    config: &Config,
    gateway: &RestGateway,
    password: &str,
    command: AdminCommand,
) -> anyhow::Result<()> {
    let gate = AdminGate::new(config.admin_password.clone());
    let console = gate.unlock(gateway, password)?;

    match command {
        AdminCommand::AddCategory { name, description } => {
            let category = console.add_category(&name, description.as_deref()).await?;
            println!("Added category {} [{}].", category.name, category.id);
        }
        AdminCommand::RemoveCategory { id } => {
            console.delete_category(&CategoryId::from(id)).await?;
            println!("Removed category.");
        }
        AdminCommand::AddParticipant {
            category,
            name,
            description,
            image_url,
            image_file,
        } => {
            let image = match (image_url, image_file) {
                (Some(url), _) => Some(ImageSource::Url(url)),
                (None, Some(path)) => Some(ImageSource::Upload(read_image(&path)?)),
                (None, None) => None,
            };
            let participant = console
                .add_participant(ParticipantDraft {
                    category_id: CategoryId::from(category),
                    name,
                    description,
                    image,
                })
                .await?;
            println!(
                "Added participant {} [{}].",
                participant.name, participant.id
            );
            if let Some(url) = &participant.image_url {
                println!("Image: {url}");
            }
        }
        AdminCommand::RemoveParticipant { id } => {
            console.delete_participant(&ParticipantId::from(id)).await?;
            println!("Removed participant.");
        }
        AdminCommand::Stats => {
            let stats = console.stats().await;
            println!("categories:   {}", stats.categories);
            println!("participants: {}", stats.participants);
            println!("votes:        {}", stats.votes);
        }
    }
    Ok(())
}

fn read_image(path: &Path) -> anyhow::Result<ImageUpload> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => bail!("could not read {}: {e}", path.display()),
    };
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(ImageUpload {
        content_type: content_type(&file_name).to_owned(),
        file_name,
        bytes,
    })
}

/// Guesses the MIME type of a file from its extension.
fn content_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("avif") => "image/avif",
        _ => "application/octet-stream",
    }
}

fn parse_pick(value: &str) -> Result<(CategoryId, ParticipantId), String> {
    match value.split_once('=') {
        Some((category, participant)) if !category.is_empty() && !participant.is_empty() => {
            Ok((CategoryId::from(category), ParticipantId::from(participant)))
        }
        _ => Err(format!("expected <category-id>=<participant-id>, got {value:?}")),
    }
}

fn parse_table(value: &str) -> Result<Table, String> {
    match Table::from_name(value.trim()) {
        Some(table) => Ok(table),
        None => {
            let expected = "categories, participants or votes";
            Err(format!("unknown table {value:?}, expected {expected}"))
        }
    }
}

fn print_catalog(catalog: &[CategoryEntry]) {
    if catalog.is_empty() {
        println!("No categories yet.");
    }
    for entry in catalog {
        println!("{} [{}]", entry.category.name, entry.category.id);
        if let Some(description) = &entry.category.description {
            println!("  {description}");
        }
        if entry.participants.is_empty() {
            println!("  (no participants)");
        }
        for participant in &entry.participants {
            println!("  - {} [{}]", participant.name, participant.id);
        }
    }
}

fn print_tally(tally: &Tally) {
    for category in &tally.results {
        println!("{} ({} votes)", category.name, category.total_votes);
        for participant in &category.participants {
            let marker = if participant.leading {
                "  (leading)"
            } else {
                ""
            };
            println!(
                "  {:>3}% {:>5}  {}{marker}",
                participant.percentage, participant.votes, participant.name
            );
        }
    }
    if tally.votes_hidden {
        println!("Vote counts are hidden: the votes table is not readable.");
    }
}
