use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use collaboration::{
    AuthSession, ClientConfig, FileTokenStore, HttpVersionStore, JoinRequest, LoginCredentials,
    RealtimeChannel, RegisterCredentials, SessionProvider, SimulationConfig, TestLab,
    TracingNotifier, VersionCoordinator, WsChannel,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use workspace::{FileNode, FileTree, FileTreeProvider, SharedFileTree};

#[derive(Parser)]
#[command(name = "codesync")]
#[command(about = "Code-Sync CLI - versions, code freeze and test runs from the terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Client config file (JSON); environment variables apply otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend URL, overrides the config
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and remember the session
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,
    },

    /// Create an account and sign in
    Register {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,

        #[arg(short, long)]
        username: String,
    },

    /// Forget the stored session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Manage saved versions
    Versions {
        #[command(subcommand)]
        action: VersionAction,
    },

    /// Code freeze over the realtime relay
    Freeze {
        #[command(subcommand)]
        action: FreezeAction,
    },

    /// Generate and run simulated tests
    Tests {
        #[command(subcommand)]
        action: TestAction,
    },
}

#[derive(Subcommand)]
enum VersionAction {
    /// List versions and the current one
    List,

    /// Save a file tree as a new version
    Create {
        name: String,

        #[arg(short, long, default_value = "")]
        description: String,

        #[command(flatten)]
        source: TreeSource,
    },

    /// Fetch a version's file tree and make it current
    Switch {
        id: String,

        /// Write the tree here as JSON instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete a version
    Delete { id: String },
}

#[derive(Subcommand)]
enum FreezeAction {
    /// Flip the room's code freeze
    Toggle {
        #[arg(short, long, default_value = "default")]
        room: String,

        #[arg(long)]
        reason: Option<String>,

        /// How long to listen for the room's current value first
        #[arg(long, default_value = "500")]
        wait_ms: u64,
    },

    /// Print freeze changes until interrupted
    Watch {
        #[arg(short, long, default_value = "default")]
        room: String,
    },
}

#[derive(Subcommand)]
enum TestAction {
    /// Generate a test for every file of a tree, then run them all
    Run {
        #[command(flatten)]
        source: TreeSource,

        /// Probability that a run passes
        #[arg(long, default_value = "0.7")]
        pass_rate: f64,

        #[arg(long)]
        seed: Option<u64>,

        /// Skip the simulated delays
        #[arg(long)]
        fast: bool,
    },
}

#[derive(clap::Args)]
struct TreeSource {
    /// File tree as JSON
    #[arg(long, conflicts_with = "dir")]
    tree: Option<PathBuf>,

    /// Directory to snapshot
    #[arg(long)]
    dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose {
        "codesync=debug,collaboration=debug"
    } else {
        "codesync=info,collaboration=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::from_env(),
    };
    if let Some(url) = cli.api_url {
        config = config.with_api_url(url);
    }
    debug!("Using backend {}", config.api_url);

    match cli.command {
        Commands::Login { email, password } => login_command(config, email, password).await,
        Commands::Register {
            email,
            password,
            username,
        } => register_command(config, email, password, username).await,
        Commands::Logout => logout_command(config).await,
        Commands::Whoami => whoami_command(config).await,
        Commands::Versions { action } => versions_command(config, action).await,
        Commands::Freeze { action } => freeze_command(config, action).await,
        Commands::Tests { action } => tests_command(config, action).await,
    }
}

fn auth_session(config: &ClientConfig) -> Result<Arc<AuthSession>> {
    let tokens = Arc::new(FileTokenStore::new(config.token_path.clone()));
    Ok(Arc::new(AuthSession::new(
        config.clone(),
        tokens,
        Arc::new(TracingNotifier),
    )?))
}

/// Session restored from the token file; fails when nobody is signed in.
async fn signed_in(config: &ClientConfig) -> Result<Arc<AuthSession>> {
    let session = auth_session(config)?;
    if session.restore().await.is_none() {
        bail!("not logged in; run `codesync login` first");
    }
    Ok(session)
}

async fn login_command(config: ClientConfig, email: String, password: String) -> Result<()> {
    let session = auth_session(&config)?;
    let user = session.login(LoginCredentials { email, password }).await?;
    println!("Logged in as {} <{}>", user.username, user.email);
    Ok(())
}

async fn register_command(
    config: ClientConfig,
    email: String,
    password: String,
    username: String,
) -> Result<()> {
    let session = auth_session(&config)?;
    let user = session
        .register(RegisterCredentials {
            email,
            password,
            username,
        })
        .await?;
    println!("Registered {} <{}>", user.username, user.email);
    Ok(())
}

async fn logout_command(config: ClientConfig) -> Result<()> {
    auth_session(&config)?.logout().await?;
    Ok(())
}

async fn whoami_command(config: ClientConfig) -> Result<()> {
    let session = signed_in(&config).await?;
    if let Some(user) = session.current_user() {
        let role = if user.is_admin { " (admin)" } else { "" };
        println!("{} <{}>{}", user.username, user.email, role);
    }
    Ok(())
}

fn coordinator(
    config: &ClientConfig,
    session: Arc<AuthSession>,
    files: SharedFileTree,
    channel: Option<Arc<dyn RealtimeChannel>>,
) -> Result<VersionCoordinator> {
    Ok(VersionCoordinator::new(
        Arc::new(HttpVersionStore::new(config.clone())?),
        session,
        Arc::new(files),
        channel,
        Arc::new(TracingNotifier),
    ))
}

async fn versions_command(config: ClientConfig, action: VersionAction) -> Result<()> {
    let session = signed_in(&config).await?;

    match action {
        VersionAction::List => {
            let coordinator = coordinator(&config, session, SharedFileTree::default(), None)?;
            let state = coordinator.fetch_versions().await?;
            let current = state.current_version.as_ref().map(|v| v.id.as_str());

            if state.versions.is_empty() {
                println!("No versions yet");
            }
            for version in &state.versions {
                let marker = if Some(version.id.as_str()) == current { "*" } else { " " };
                println!(
                    "{} {}  {}  {}  {}",
                    marker,
                    version.id,
                    version.created_at.format("%Y-%m-%d %H:%M"),
                    version.name,
                    version.description
                );
            }
        }
        VersionAction::Create {
            name,
            description,
            source,
        } => {
            let tree = load_tree(&source).await?;
            info!("Snapshot has {} files", tree.file_count());
            let coordinator = coordinator(&config, session, SharedFileTree::new(tree), None)?;
            let created = coordinator.create_version(&name, &description).await?;
            println!("{}", created.id);
        }
        VersionAction::Switch { id, output } => {
            let files = SharedFileTree::default();
            let coordinator = coordinator(&config, session, files.clone(), None)?;
            coordinator.switch_version(&id).await?;

            let json = serde_json::to_string_pretty(&files.snapshot())?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!("Wrote file tree to {:?}", path);
                }
                None => println!("{}", json),
            }
        }
        VersionAction::Delete { id } => {
            let coordinator = coordinator(&config, session, SharedFileTree::default(), None)?;
            coordinator.delete_version(&id).await?;
        }
    }

    Ok(())
}

async fn join_room(
    config: &ClientConfig,
    session: &AuthSession,
    room: &str,
) -> Result<Arc<WsChannel>> {
    let join = JoinRequest {
        room_id: room.to_string(),
        username: session.display_name(),
    };
    let channel = WsChannel::connect(&config.realtime_url, join)
        .await
        .with_context(|| format!("connecting to {}", config.realtime_url))?;
    info!("Joined room {}", room);
    Ok(Arc::new(channel))
}

async fn freeze_command(config: ClientConfig, action: FreezeAction) -> Result<()> {
    match action {
        FreezeAction::Toggle {
            room,
            reason,
            wait_ms,
        } => {
            let session = signed_in(&config).await?;
            let channel = join_room(&config, &session, &room).await?;
            let coordinator = coordinator(
                &config,
                session,
                SharedFileTree::default(),
                Some(channel.clone()),
            )?;
            coordinator.start().await;

            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            let freeze = coordinator.toggle_code_freeze(reason).await?;
            channel.disconnect().await;

            if freeze.is_active() {
                println!("Code frozen by {}", freeze.frozen_by.unwrap_or_default());
            } else {
                println!("Code freeze lifted");
            }
        }
        FreezeAction::Watch { room } => {
            let session = auth_session(&config)?;
            if session.restore().await.is_none() {
                warn!("Watching anonymously");
            }
            let channel = join_room(&config, &session, &room).await?;
            let coordinator = coordinator(
                &config,
                session,
                SharedFileTree::default(),
                Some(channel.clone()),
            )?;
            coordinator.start().await;

            info!("Watching room {} for code freeze changes (Ctrl-C to stop)", room);
            tokio::signal::ctrl_c().await?;
            coordinator.stop();
            channel.disconnect().await;
        }
    }

    Ok(())
}

async fn tests_command(config: ClientConfig, action: TestAction) -> Result<()> {
    let TestAction::Run {
        source,
        pass_rate,
        seed,
        fast,
    } = action;

    let session = signed_in(&config).await?;
    let tree = load_tree(&source).await?;
    let ids: Vec<_> = tree.files().iter().map(|f| f.id().clone()).collect();
    let files = SharedFileTree::new(tree);

    let mut simulation = if fast {
        SimulationConfig::instant()
    } else {
        SimulationConfig::default()
    }
    .with_pass_rate(pass_rate);
    if let Some(seed) = seed {
        simulation = simulation.with_seed(seed);
    }

    let lab = TestLab::new(session, Arc::new(files.clone()), Arc::new(TracingNotifier), simulation);
    for id in &ids {
        if let Err(e) = lab.generate_test(id).await {
            let name = files.file_by_id(id).map(|f| f.name().to_string());
            warn!("Skipped {}: {}", name.unwrap_or_else(|| id.to_string()), e);
        }
    }

    let summary = lab.run_all_tests().await?;
    for case in lab.tests() {
        if let Some(result) = &case.result {
            println!("{:?}  {:>4}ms  {}", result.status, result.duration, case.name);
        }
    }
    println!("{}/{} passed", summary.passed, summary.total);
    Ok(())
}

async fn load_tree(source: &TreeSource) -> Result<FileTree> {
    match (&source.tree, &source.dir) {
        (Some(path), _) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            Ok(FileTree::from_json(serde_json::from_str(&text)?)?)
        }
        (None, Some(dir)) => snapshot_dir(dir),
        (None, None) => bail!("pass --tree <file.json> or --dir <directory>"),
    }
}

/// Text files under `dir`, hidden entries skipped.
fn snapshot_dir(dir: &Path) -> Result<FileTree> {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("root")
        .to_string();
    let children = scan_children(dir)?;
    Ok(FileTree::new(FileNode::directory(name, children))?)
}

fn scan_children(dir: &Path) -> Result<Vec<FileNode>> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut children = Vec::new();
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        if path.is_dir() {
            children.push(FileNode::directory(name, scan_children(&path)?));
        } else {
            match std::fs::read_to_string(&path) {
                Ok(content) => children.push(FileNode::file(name, content)),
                Err(e) => debug!("Skipping {:?}: {}", path, e),
            }
        }
    }
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src").join("main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("README.md"), "# demo").unwrap();
        std::fs::write(dir.path().join(".env"), "SECRET=1").unwrap();

        let tree = snapshot_dir(dir.path()).unwrap();
        let names: Vec<_> = tree.root().children().iter().map(|n| n.name().to_string()).collect();
        assert_eq!(names, vec!["README.md", "src"]);
        assert_eq!(tree.file_count(), 2);
    }

    #[tokio::test]
    async fn test_load_tree_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let tree = FileTree::new(FileNode::directory(
            "project",
            vec![FileNode::file("app.ts", "export {}")],
        ))
        .unwrap();
        let path = dir.path().join("tree.json");
        std::fs::write(&path, serde_json::to_string(&tree).unwrap()).unwrap();

        let source = TreeSource {
            tree: Some(path),
            dir: None,
        };
        assert_eq!(load_tree(&source).await.unwrap(), tree);

        let empty = TreeSource {
            tree: None,
            dir: None,
        };
        assert!(load_tree(&empty).await.is_err());
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::parse_from(["codesync", "versions", "create", "v1", "--dir", "."]);
        assert!(matches!(
            cli.command,
            Commands::Versions {
                action: VersionAction::Create { .. }
            }
        ));
    }
}
