//! SaarthiNav - Dual-robot goal dispatcher
//!
//! ## Usage
//!
//! ```text
//! saarthi-nav [--config saarthi.toml] [--sim]        run the control loop
//! saarthi-nav serve --robot explorer [--bind ADDR]   run a simulated navigation server
//! ```
//!
//! With the TCP backend, start one `serve` per robot (or real navigation
//! servers speaking the same protocol) before the control loop. `--sim` runs
//! both robots in-process instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use saarthi_nav::action::{
    ActionClient, NavServer, NavServerConfig, NavigationGoal, SimulatedActionClient,
    TcpActionClient,
};
use saarthi_nav::clock::{Clock, SystemClock};
use saarthi_nav::config::{BackendKind, RobotConfig, SaarthiConfig};
use saarthi_nav::{
    ControlLoop, GoalDispatcher, LoopTiming, NavError, Result, ShutdownSignal, TransformObserver,
    TransformPublisher, TransformRegistry,
};

/// Default config file picked up from the working directory
const DEFAULT_CONFIG_FILE: &str = "saarthi.toml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./saarthi.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use in-process simulated robots instead of TCP servers
    #[arg(long)]
    sim: bool,

    /// Log filter, e.g. "saarthi_nav=debug" (RUST_LOG takes precedence)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a simulated navigation action server for one robot
    Serve {
        /// Which robot's service and start pose to serve
        #[arg(long, value_enum, default_value = "explorer")]
        robot: RobotSelect,

        /// Bind address (defaults to the robot's configured address)
        #[arg(long)]
        bind: Option<String>,

        /// Travel speed in m/s (defaults to sim.speed)
        #[arg(long)]
        speed: Option<f64>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RobotSelect {
    Explorer,
    Follower,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, source) = load_config(cli.config.as_deref())?;

    // Initialize logging
    let directive = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive)),
        )
        .init();

    info!("SaarthiNav v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", source);

    // Set up shutdown signal handler
    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        handler_signal.signal();
    })
    .map_err(|e| NavError::Config(format!("Error setting Ctrl-C handler: {}", e)))?;

    match cli.command {
        Some(Command::Serve { robot, bind, speed }) => {
            serve(&config, robot, bind, speed, shutdown)
        }
        None => run(&config, cli.sim, shutdown),
    }
}

/// Explicit path, then ./saarthi.toml, then built-in defaults.
fn load_config(path: Option<&Path>) -> Result<(SaarthiConfig, String)> {
    if let Some(path) = path {
        return Ok((SaarthiConfig::load(path)?, format!("{:?}", path)));
    }
    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
        return Ok((SaarthiConfig::load(default_path)?, format!("{:?}", default_path)));
    }
    Ok((SaarthiConfig::default(), "built-in defaults".to_string()))
}

fn serve(
    config: &SaarthiConfig,
    robot: RobotSelect,
    bind: Option<String>,
    speed: Option<f64>,
    shutdown: ShutdownSignal,
) -> Result<()> {
    let robot = match robot {
        RobotSelect::Explorer => &config.explorer,
        RobotSelect::Follower => &config.follower,
    };
    let mut server_config = NavServerConfig::from_sim(robot, &config.sim);
    if let Some(speed) = speed {
        server_config.speed = speed;
    }
    let address = bind.unwrap_or_else(|| robot.address.clone());

    NavServer::bind(&address, server_config, shutdown)?.run()
}

fn run(config: &SaarthiConfig, force_sim: bool, shutdown: ShutdownSignal) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(TransformRegistry::new(config.timing.cache_duration()));
    let backend = if force_sim {
        BackendKind::Sim
    } else {
        config.backend
    };
    info!("Action backend: {:?}", backend);

    let mut dispatchers = Vec::with_capacity(2);
    for robot in config.robots() {
        let client = build_client(robot, config, backend, &registry, &clock)?;
        dispatchers.push(GoalDispatcher::new(
            &robot.name,
            client,
            NavigationGoal::from_config(robot, clock.now()),
            config.timing.server_wait(),
        ));
    }

    // Wait for the action servers, explorer fully before follower
    for dispatcher in dispatchers.iter_mut() {
        match dispatcher.await_server(&shutdown) {
            Ok(()) => {}
            Err(NavError::Shutdown) => {
                info!("Shutdown while waiting for {}", dispatcher.service());
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }

    let mut dispatchers = dispatchers.into_iter();
    let (Some(explorer), Some(follower)) = (dispatchers.next(), dispatchers.next()) else {
        return Err(NavError::Config("expected explorer and follower".into()));
    };

    let publisher = TransformPublisher::new(&config.transform, Arc::clone(&registry), Arc::clone(&clock));
    let observer = TransformObserver::new(&config.transform, Arc::clone(&registry));

    let mut control = ControlLoop::new(
        explorer,
        follower,
        publisher,
        observer,
        LoopTiming::from(&config.timing),
        clock,
        shutdown,
    );
    control.run();

    info!("SaarthiNav finished");
    Ok(())
}

fn build_client(
    robot: &RobotConfig,
    config: &SaarthiConfig,
    backend: BackendKind,
    registry: &Arc<TransformRegistry>,
    clock: &Arc<dyn Clock>,
) -> Result<Box<dyn ActionClient>> {
    Ok(match backend {
        BackendKind::Tcp => Box::new(TcpActionClient::connect(&robot.service, &robot.address, true)?),
        BackendKind::Sim => Box::new(SimulatedActionClient::spawn(
            robot,
            &config.sim,
            Some(Duration::from_secs_f64(config.sim.ready_after_secs)),
            Arc::clone(registry),
            Arc::clone(clock),
        )?),
    })
}
