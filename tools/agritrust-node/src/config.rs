use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "agritrust-node",
    about = "AgriTrust credential and EcoPassport service"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, env = "AGRITRUST_LISTEN", default_value = "0.0.0.0:3100")]
    pub listen: SocketAddr,

    /// Public origin of the web app; credential view URLs are built from it.
    #[arg(
        long,
        env = "AGRITRUST_PUBLIC_ORIGIN",
        default_value = "http://localhost:8080"
    )]
    pub public_origin: String,

    /// PostgreSQL connection string. Without it, records live in memory and
    /// vanish on restart.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Maximum pooled database connections.
    #[arg(long, env = "AGRITRUST_POOL_SIZE", default_value_t = 8)]
    pub pool_size: usize,

    /// Seconds to wait for a pooled connection before reporting the store
    /// unavailable.
    #[arg(long, default_value_t = 5)]
    pub pool_wait_secs: u64,

    /// Do not apply the bundled schema at startup.
    #[arg(long)]
    pub skip_migrations: bool,
}

impl Cli {
    pub fn pool_wait(&self) -> Duration {
        Duration::from_secs(self.pool_wait_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_flags() {
        let cli = Cli::try_parse_from(["agritrust-node"]).unwrap();
        assert_eq!(cli.pool_size, 8);
        assert!(!cli.skip_migrations);
        assert_eq!(cli.pool_wait(), Duration::from_secs(5));
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "agritrust-node",
            "--listen",
            "127.0.0.1:9000",
            "--public-origin",
            "https://agritrust.example",
            "--database-url",
            "postgres://u:p@localhost/agritrust",
            "--skip-migrations",
        ])
        .unwrap();
        assert_eq!(cli.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cli.public_origin, "https://agritrust.example");
        assert!(cli.database_url.is_some());
        assert!(cli.skip_migrations);
    }
}
