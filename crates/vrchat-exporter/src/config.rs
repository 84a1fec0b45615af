//! Exporter configuration.

use clap::Parser;
use url::Url;
use vrchat_api::{Credentials, DEFAULT_API_URL};

use std::{fmt, net::SocketAddr, time::Duration};

use crate::PushGateway;

/// Exporter configuration parsed from command-line args and environment variables.
#[derive(Clone, Parser)]
#[command(version, about = "Exports presence of VRChat friends as Prometheus metrics")]
pub struct Config {
    /// Username of the VRChat user.
    #[arg(long, env = "VRCHAT_USERNAME")]
    pub username: String,
    /// Password of the VRChat user.
    #[arg(long, env = "VRCHAT_PASSWORD", hide_env_values = true)]
    pub password: String,
    /// One-time code of the VRChat user, if the account uses two-factor authentication.
    #[arg(long, env = "VRCHAT_TOTP", hide_env_values = true)]
    pub totp: Option<String>,
    /// Base URL of the VRChat API.
    #[arg(long, env = "VRCHAT_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: Url,
    /// Address to listen on for HTTP requests.
    #[arg(long, env = "VRCHAT_EXPORTER_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,
    /// Address of the Prometheus push gateway, e.g. `https://prometheus.example.net/api/prom/push`.
    /// If set, metrics are pushed instead of being served.
    #[arg(long, env = "VRCHAT_EXPORTER_PUSHGATEWAY")]
    pub pushgateway: Option<Url>,
    /// Username for the push gateway.
    #[arg(long, env = "VRCHAT_EXPORTER_PUSHGATEWAY_USERNAME")]
    pub pushgateway_username: Option<String>,
    /// Password for the push gateway.
    #[arg(
        long,
        env = "VRCHAT_EXPORTER_PUSHGATEWAY_PASSWORD",
        hide_env_values = true
    )]
    pub pushgateway_password: Option<String>,
    /// Interval in seconds between pushes to the push gateway.
    #[arg(
        long,
        env = "VRCHAT_EXPORTER_INTERVAL",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub interval: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Config")
            .field("username", &self.username)
            .field("api_url", &self.api_url)
            .field("listen", &self.listen)
            .field("pushgateway", &self.pushgateway)
            .field("pushgateway_username", &self.pushgateway_username)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Mutually exclusive ways to run the exporter.
#[derive(Debug, Clone)]
pub enum RunMode {
    /// Serve metrics over HTTP for scraping.
    Serve {
        /// Address to bind the server to.
        bind_address: SocketAddr,
    },
    /// Periodically push metrics to a gateway.
    Push(PushGateway),
}

impl Config {
    /// Returns VRChat credentials.
    pub fn credentials(&self) -> Credentials {
        let credentials = Credentials::new(&self.username, &self.password);
        match &self.totp {
            Some(code) => credentials.with_totp(code),
            None => credentials,
        }
    }

    /// Selects the run mode. Pushing takes precedence: if a push gateway is configured,
    /// metrics are not served.
    pub fn run_mode(&self) -> RunMode {
        let Some(endpoint) = &self.pushgateway else {
            return RunMode::Serve {
                bind_address: self.listen,
            };
        };

        let gateway = PushGateway::new(endpoint.clone(), Duration::from_secs(self.interval));
        let gateway = match &self.pushgateway_username {
            Some(username) => gateway.with_basic_auth(
                username.clone(),
                self.pushgateway_password.clone().unwrap_or_default(),
            ),
            None => gateway,
        };
        RunMode::Push(gateway)
    }
}
