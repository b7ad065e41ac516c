use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use log::{debug, error, info};

use autokeeper::error::{ConfigError, ExitCode, SerializationError};
use autokeeper::fsm::TransitionTable;
use autokeeper::instance::hooks::HookInstance;
use autokeeper::monitor::grpc::GrpcMonitorTransport;
use autokeeper::monitor::{render_node_table, Monitor, NodeAddress};
use autokeeper::{Keeper, KeeperConfig, KeeperError, NodeRole};

#[derive(Debug, Parser)]
#[command(
    name = "autokeeper",
    version,
    about = "Drive a database instance through the roles assigned by its monitor"
)]
struct Cli {
    /// Keeper configuration file
    #[arg(short, long, env = "AUTOKEEPER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// More output, repeat for more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Local state machine commands
    #[command(subcommand)]
    Fsm(FsmCmd),
    /// Monitor commands
    #[command(subcommand)]
    Monitor(MonitorCmd),
}

#[derive(Debug, Subcommand)]
enum FsmCmd {
    /// Print the transition table as a graphviz digraph
    Gv,
    #[command(flatten)]
    Local(LocalFsmCmd),
}

/// `fsm` commands that work on the configured node.
#[derive(Debug, Subcommand)]
enum LocalFsmCmd {
    /// Create the state file
    Init,
    /// Print the state as JSON
    State,
    /// List the roles reachable from the current role
    List,
    /// Drive the node to a role without asking the monitor
    Assign {
        role: NodeRole,
        host: Option<String>,
        port: Option<u16>,
    },
    /// Run one reconciliation round
    Step,
}

#[derive(Debug, Subcommand)]
enum MonitorCmd {
    #[command(subcommand)]
    Get(GetCmd),
    /// Register this node with the monitor
    Register { role: NodeRole },
    /// Report this node to the monitor and record its assigned role
    Active,
    /// Check the monitor extension version
    Version,
}

#[derive(Debug, Subcommand)]
enum GetCmd {
    Primary,
    Others {
        #[arg(long)]
        json: bool,
        #[arg(long, default_value = "any")]
        role: NodeRole,
    },
    Coordinator,
}

type CliKeeper = Keeper<HookInstance, GrpcMonitorTransport>;

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                ExitCode::BadArgs.code()
            } else {
                ExitCode::Ok.code()
            };
            let _ = e.print();
            process::exit(code);
        }
    };
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli) {
        error!("{}", e);
        process::exit(e.exit_code().code());
    }
}

fn run(cli: Cli) -> Result<(), KeeperError> {
    match cli.command {
        Command::Fsm(FsmCmd::Gv) => {
            print!("{}", TransitionTable::keeper().to_graphviz());
            Ok(())
        }
        Command::Fsm(FsmCmd::Local(cmd)) => {
            let (runtime, mut keeper) = open_keeper(cli.config)?;
            run_fsm(&mut keeper, &runtime, cmd)
        }
        Command::Monitor(cmd) => {
            let (runtime, mut keeper) = open_keeper(cli.config)?;
            runtime.block_on(run_monitor(&mut keeper, cmd))
        }
    }
}

/// Load the configuration and build the keeper inside a fresh runtime.
fn open_keeper(
    config: Option<PathBuf>,
) -> Result<(tokio::runtime::Runtime, CliKeeper), KeeperError> {
    let path = config.ok_or_else(|| {
        ConfigError::Invalid("no configuration file, use --config or AUTOKEEPER_CONFIG".into())
    })?;
    let config = KeeperConfig::load(&path)?;
    debug!("Loaded configuration from {}", path.display());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| KeeperError::Internal(format!("failed to start the runtime: {}", e)))?;
    let keeper = {
        let _guard = runtime.enter();
        build_keeper(config)?
    };
    Ok((runtime, keeper))
}

fn build_keeper(config: KeeperConfig) -> Result<CliKeeper, KeeperError> {
    let instance = HookInstance::new(config.pgdata.clone(), config.instance.hooks.clone());
    let monitor = match config.monitor.as_ref().filter(|_| config.monitor_enabled()) {
        Some(monitor) => {
            let transport = GrpcMonitorTransport::connect_lazy(&monitor.uri, config.monitor_timeout())?;
            Some(Monitor::new(transport, config.monitor_timeout()))
        }
        None => None,
    };
    Keeper::new(config, instance, monitor)
}

fn peer_address(host: Option<String>, port: Option<u16>) -> Result<Option<NodeAddress>, KeeperError> {
    match (host, port) {
        (Some(host), Some(port)) => Ok(Some(NodeAddress::new(host, port))),
        (None, None) => Ok(None),
        _ => Err(KeeperError::BadArgs(
            "a peer needs both a host and a port".to_string(),
        )),
    }
}

fn run_fsm(
    keeper: &mut CliKeeper,
    runtime: &tokio::runtime::Runtime,
    cmd: LocalFsmCmd,
) -> Result<(), KeeperError> {
    match cmd {
        LocalFsmCmd::Init => print!("{}", keeper.init_state()?),
        LocalFsmCmd::State => println!("{}", keeper.refresh_state()?.to_json()?),
        LocalFsmCmd::List => {
            for role in keeper.reachable_roles()? {
                println!("{}", role);
            }
        }
        LocalFsmCmd::Assign { role, host, port } => {
            let peer = peer_address(host, port)?;
            let convergence = keeper.assign(role, peer)?;
            info!(
                "Reached \"{}\" in {} transition(s)",
                convergence.state.current_role, convergence.hops
            );
            println!("{}", convergence.state.to_json()?);
        }
        LocalFsmCmd::Step => {
            let report = runtime.block_on(keeper.step())?;
            println!("{}", report);
        }
    }
    Ok(())
}

async fn run_monitor(keeper: &mut CliKeeper, cmd: MonitorCmd) -> Result<(), KeeperError> {
    match cmd {
        MonitorCmd::Get(GetCmd::Primary) => {
            let primary = keeper.primary().await?;
            print!("{}", render_node_table(&[primary]));
        }
        MonitorCmd::Get(GetCmd::Others { json, role }) => {
            let others = keeper.others(role).await?;
            if json {
                let rendered = serde_json::to_string_pretty(&others).map_err(|e| {
                    SerializationError::Encode {
                        what: "node list",
                        reason: e.to_string(),
                    }
                })?;
                println!("{}", rendered);
            } else {
                print!("{}", render_node_table(&others));
            }
        }
        MonitorCmd::Get(GetCmd::Coordinator) => match keeper.coordinator().await? {
            Some(coordinator) => print!("{}", render_node_table(&[coordinator])),
            None => info!(
                "No coordinator is ready in formation \"{}\"",
                keeper.config().formation
            ),
        },
        MonitorCmd::Register { role } => {
            let assigned = keeper.register(role).await?;
            println!("{}", keeper.status_line(&assigned));
        }
        MonitorCmd::Active => {
            let assigned = keeper.node_active().await?;
            println!("{}", keeper.status_line(&assigned));
        }
        MonitorCmd::Version => {
            let version = keeper.extension_version().await?;
            println!("{}", version.installed_version);
        }
    }
    Ok(())
}
