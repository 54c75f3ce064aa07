use std::sync::Arc;

use clap::Parser;
use minibox_activation::{
    ActivationController, ActivationOutcome, OwnershipHint, classify_status,
};
use minibox_api_client::MiniboxApiClient;

mod activation_bridge;
mod config;

use activation_bridge::{ClientBackend, StdinRetryCoordinator, snapshot_from_project};
use config::CliSettings;

#[derive(Parser)]
#[command(name = "minibox")]
#[command(about = "Minibox mini-app platform CLI")]
pub struct MiniboxCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Open a project: activate its sandbox if needed, then print the preview URL
    Open(OpenArgs),
    /// Show a project's status fields and their classification
    Status { project_id: String },
    /// Request sandbox activation without waiting for readiness
    Start { project_id: String },
    /// Stop a project's sandbox
    Stop { project_id: String },
    /// List projects, paged
    List {
        #[arg(long, default_value_t = 1)]
        page: u64,
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    /// List the caller's mini-app library, split into owned and shared
    Mine {
        #[arg(long, default_value_t = 20)]
        limit: u64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Rename a project
    Rename { project_id: String, name: String },
    /// Delete a project
    Delete {
        project_id: String,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(clap::Args)]
pub struct OpenArgs {
    pub project_id: String,
    /// Skip the ownership probe; the project is known to be owned
    #[arg(long)]
    pub owned: bool,
    /// The project is known not to be owned; prints the last known preview
    #[arg(long, conflicts_with = "owned")]
    pub not_owned: bool,
    /// Never prompt; retry questions are answered with no
    #[arg(long)]
    pub no_input: bool,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = MiniboxCli::parse();
    let settings = config::resolve_settings();
    tracing::debug!(
        base_url = %settings.base_url,
        base_url_source = %settings.base_url_source,
        poll_interval_ms = settings.poll_interval_ms,
        poll_interval_source = %settings.poll_interval_source,
        authenticated = settings.access_token.is_some(),
        "settings resolved"
    );
    let client = MiniboxApiClient::new(settings.client_config())?;

    match cli.command {
        Commands::Open(args) => run_open(client, &settings, args).await,
        Commands::Status { project_id } => run_status(client, &project_id).await,
        Commands::Start { project_id } => run_start(client, &project_id).await,
        Commands::Stop { project_id } => run_stop(client, &project_id).await,
        Commands::List { page, limit } => run_list(client, page, limit).await,
        Commands::Mine { limit, offset } => run_mine(client, limit, offset).await,
        Commands::Rename { project_id, name } => run_rename(client, &project_id, &name).await,
        Commands::Delete { project_id, yes } => run_delete(client, &project_id, yes).await,
    }
}

async fn run_open(
    client: MiniboxApiClient,
    settings: &CliSettings,
    args: OpenArgs,
) -> anyhow::Result<()> {
    let envelope = client.get_project(&args.project_id).await?;
    let code = envelope.code;
    let info = envelope.info.clone();
    let Some(project) = envelope.ok_data() else {
        return Err(envelope_failure("project fetch", code, info));
    };
    let snapshot = snapshot_from_project(&project);

    let hint = if args.owned {
        OwnershipHint::Owner
    } else if args.not_owned {
        OwnershipHint::NotOwner
    } else {
        OwnershipHint::Unknown
    };

    let backend = Arc::new(ClientBackend::new(client));
    let retry = Arc::new(StdinRetryCoordinator::new(args.no_input));
    let controller =
        ActivationController::with_config(backend, retry, settings.activation_config());

    let handle = controller.start(&snapshot, hint);
    let mut signals = handle.signals();
    let render = tokio::spawn(async move {
        while signals.changed().await.is_ok() {
            let signal = *signals.borrow_and_update();
            if signal.is_processing {
                eprint!(
                    "\r{:<10} {:>3}%",
                    signal.phase.as_str(),
                    (signal.progress * 100.0).round() as u32
                );
            }
        }
    });

    let outcome = handle.outcome().await;
    render.abort();
    eprintln!();

    match outcome {
        ActivationOutcome::Ready(fresh) => {
            tracing::info!(project_id = %fresh.project_id, "sandbox ready");
            match &fresh.preview_url {
                Some(url) => println!("{url}"),
                None => println!("{}", fresh.project_id),
            }
            Ok(())
        }
        ActivationOutcome::NotOwner(stale) => {
            eprintln!("not the project owner; preview may be stale");
            match &stale.preview_url {
                Some(url) => println!("{url}"),
                None => println!("{}", stale.project_id),
            }
            Ok(())
        }
        ActivationOutcome::Abandoned(reason) => {
            anyhow::bail!("sandbox activation abandoned ({})", reason.as_str())
        }
        ActivationOutcome::Cancelled => anyhow::bail!("sandbox activation cancelled"),
    }
}

async fn run_status(client: MiniboxApiClient, project_id: &str) -> anyhow::Result<()> {
    let envelope = client.get_project(project_id).await?;
    let code = envelope.code;
    let info = envelope.info.clone();
    let Some(project) = envelope.ok_data() else {
        return Err(envelope_failure("status fetch", code, info));
    };
    let snapshot = snapshot_from_project(&project);
    println!(
        "{}  {}/{}  {}",
        snapshot.project_id,
        display_status(&snapshot.lifecycle_status),
        display_status(&snapshot.sandbox_status),
        classify_status(&snapshot).as_str()
    );
    if let Some(url) = &snapshot.preview_url {
        println!("{url}");
    }
    Ok(())
}

async fn run_start(client: MiniboxApiClient, project_id: &str) -> anyhow::Result<()> {
    let envelope = client.start_project(project_id).await?;
    if !envelope.is_ok() {
        return Err(envelope_failure("start request", envelope.code, envelope.info));
    }
    println!("activation requested for {project_id}");
    Ok(())
}

async fn run_stop(client: MiniboxApiClient, project_id: &str) -> anyhow::Result<()> {
    let envelope = client.stop_project(project_id).await?;
    if !envelope.is_ok() {
        return Err(envelope_failure("stop request", envelope.code, envelope.info));
    }
    println!("sandbox stop requested for {project_id}");
    Ok(())
}

async fn run_list(client: MiniboxApiClient, page: u64, limit: u64) -> anyhow::Result<()> {
    let envelope = client.list_projects(page, limit).await?;
    let code = envelope.code;
    let info = envelope.info.clone();
    let Some(listing) = envelope.ok_data() else {
        return Err(envelope_failure("project listing", code, info));
    };
    for project in &listing.projects {
        println!(
            "{}  {}/{}  {}",
            project.project_id,
            display_status(&project.status),
            display_status(&project.sandbox_status),
            project.name
        );
    }
    eprintln!("page {} ({} total projects)", listing.page, listing.total);
    Ok(())
}

async fn run_mine(client: MiniboxApiClient, limit: u64, offset: u64) -> anyhow::Result<()> {
    let envelope = client.my_miniapps(limit, offset).await?;
    let code = envelope.code;
    let info = envelope.info.clone();
    let Some(library) = envelope.ok_data() else {
        return Err(envelope_failure("mini-app listing", code, info));
    };
    for project in &library.owner {
        println!(
            "owned   {}  {}/{}  {}",
            project.project_id,
            display_status(&project.status),
            display_status(&project.sandbox_status),
            project.name
        );
    }
    for project in &library.other {
        println!(
            "shared  {}  {}/{}  {}",
            project.project_id,
            display_status(&project.status),
            display_status(&project.sandbox_status),
            project.name
        );
    }
    eprintln!("{} total, offset {}", library.total, library.offset);
    Ok(())
}

async fn run_rename(client: MiniboxApiClient, project_id: &str, name: &str) -> anyhow::Result<()> {
    let envelope = client.rename_project(project_id, name).await?;
    let code = envelope.code;
    let info = envelope.info.clone();
    let Some(project) = envelope.ok_data() else {
        return Err(envelope_failure("rename", code, info));
    };
    println!("renamed {} to {}", project.project_id, project.name);
    Ok(())
}

async fn run_delete(client: MiniboxApiClient, project_id: &str, yes: bool) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!("refusing to delete {project_id} without --yes");
    }
    let envelope = client.delete_project(project_id).await?;
    if !envelope.is_ok() {
        return Err(envelope_failure("delete", envelope.code, envelope.info));
    }
    println!("deleted {project_id}");
    Ok(())
}

fn display_status(status: &str) -> &str {
    if status.is_empty() { "-" } else { status }
}

fn envelope_failure(operation: &str, code: i64, info: Option<String>) -> anyhow::Error {
    match info {
        Some(info) if !info.is_empty() => {
            anyhow::anyhow!("{operation} rejected (code {code}: {info})")
        }
        _ => anyhow::anyhow!("{operation} rejected (code {code})"),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use clap::error::ErrorKind;

    use super::{Commands, MiniboxCli};

    #[test]
    fn cli_requires_subcommand() {
        let err = match MiniboxCli::try_parse_from(["minibox"]) {
            Ok(_) => panic!("expected missing subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(
            err.kind(),
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn cli_rejects_unknown_subcommand() {
        let err = match MiniboxCli::try_parse_from(["minibox", "unknown-subcommand"]) {
            Ok(_) => panic!("expected invalid subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn open_parses_project_and_flags() {
        let cli = MiniboxCli::try_parse_from(["minibox", "open", "proj_1", "--owned", "--no-input"])
            .expect("parse open");
        let Commands::Open(args) = cli.command else {
            panic!("expected open subcommand");
        };
        assert_eq!(args.project_id, "proj_1");
        assert!(args.owned);
        assert!(!args.not_owned);
        assert!(args.no_input);
    }

    #[test]
    fn open_rejects_contradictory_ownership_flags() {
        let err = match MiniboxCli::try_parse_from([
            "minibox",
            "open",
            "proj_1",
            "--owned",
            "--not-owned",
        ]) {
            Ok(_) => panic!("expected ownership flag conflict"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn list_defaults_to_first_page() {
        let cli = MiniboxCli::try_parse_from(["minibox", "list"]).expect("parse list");
        let Commands::List { page, limit } = cli.command else {
            panic!("expected list subcommand");
        };
        assert_eq!(page, 1);
        assert_eq!(limit, 20);
    }

    #[test]
    fn delete_defaults_to_unconfirmed() {
        let cli = MiniboxCli::try_parse_from(["minibox", "delete", "proj_9"]).expect("parse delete");
        let Commands::Delete { project_id, yes } = cli.command else {
            panic!("expected delete subcommand");
        };
        assert_eq!(project_id, "proj_9");
        assert!(!yes);
    }

    #[test]
    fn rename_takes_positional_name() {
        let cli = MiniboxCli::try_parse_from(["minibox", "rename", "proj_3", "meal planner"])
            .expect("parse rename");
        let Commands::Rename { project_id, name } = cli.command else {
            panic!("expected rename subcommand");
        };
        assert_eq!(project_id, "proj_3");
        assert_eq!(name, "meal planner");
    }
}
