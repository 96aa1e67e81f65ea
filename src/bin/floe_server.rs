use std::{error::Error, net::SocketAddr, str::FromStr, sync::Arc, time::Duration};

use clap::Parser;
use floe::{
    config::{DEFAULT_PORT, ServerConfig},
    executor::SystemExecutor,
    protocol::Server,
    users::StaticUsers,
};
use log::info;

/// A user given as `name` or `name:password`.
#[derive(Debug, Clone)]
struct UserSpec {
    name: String,
    password: Option<String>,
}

impl FromStr for UserSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, password) = match s.split_once(':') {
            Some((name, password)) => (name, Some(password.to_string())),
            None => (s, None),
        };
        if name.is_empty() {
            return Err(format!("'{s}' has an empty user name"));
        }
        Ok(Self {
            name: name.to_string(),
            password,
        })
    }
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for new connections at address
    #[arg(long, env = "FLOE_LISTEN", default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
    listen: SocketAddr,

    /// Version string announced to clients
    #[arg(long, env = "FLOE_SERVER_VERSION")]
    server_version: Option<String>,

    /// Maximum number of concurrent connections
    #[arg(long, env = "FLOE_MAX_CONNECTIONS", default_value_t = 151)]
    max_connections: usize,

    /// Seconds a connection may stay idle before it is reclaimed
    #[arg(long, env = "FLOE_IDLE_TIMEOUT", default_value_t = 300)]
    idle_timeout: u64,

    /// Seconds between idle reclamation sweeps
    #[arg(long, env = "FLOE_RECLAIM_INTERVAL", default_value_t = 60)]
    reclaim_interval: u64,

    /// Close rejected connections without sending an error packet
    #[arg(long, env = "FLOE_NO_NOTIFY_REJECTED")]
    no_notify_rejected: bool,

    /// Accepted user as `name[:password]`; repeatable
    #[arg(long = "user", env = "FLOE_USERS", value_delimiter = ',', default_value = "root")]
    users: Vec<UserSpec>,

    /// Database clients may select; repeatable
    #[arg(long = "database", env = "FLOE_DATABASES", value_delimiter = ',')]
    databases: Vec<String>,
}

impl Cli {
    fn config(&self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            listen_addr: self.listen,
            server_version: self
                .server_version
                .clone()
                .unwrap_or(defaults.server_version),
            max_connections: self.max_connections,
            idle_timeout: Duration::from_secs(self.idle_timeout),
            reclaim_interval: Duration::from_secs(self.reclaim_interval),
            notify_rejected: !self.no_notify_rejected,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.config();

    let mut users = StaticUsers::new();
    for user in &cli.users {
        users.insert(user.name.as_str(), user.password.as_deref());
    }
    let executor = cli
        .databases
        .iter()
        .fold(SystemExecutor::new(&config), |executor, db| {
            executor.with_database(db.as_str())
        });

    let server = Server::bind(config, Arc::new(users), Arc::new(executor))?;
    let signal = server.shutdown_signal();
    ctrlc::set_handler(move || {
        info!("received interrupt");
        signal.trigger();
    })?;

    server.listen()?;
    Ok(())
}
