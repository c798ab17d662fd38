//! nmea-relay daemon
//!
//! Router setup (System -> Logging):
//!   - add an action of type "remote" pointing at this host, port 514
//!   - add a rule for topic "gps" using that action
//!
//! Then point the chart plotter at this host, TCP port 2000.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nmea_relay::server::signal::shutdown_signal;
use nmea_relay::{RegistryConfig, Relay, RelayConfig, RelayState};

#[derive(Parser, Debug)]
#[command(name = "nmea-relay")]
#[command(about = "Relay Mikrotik GPS syslog messages to NMEA TCP clients", long_about = None)]
struct Args {
    /// UDP address receiving the router's syslog datagrams
    #[arg(long, env = "NMEA_RELAY_INGEST_ADDR", default_value = "0.0.0.0:514")]
    ingest_addr: SocketAddr,

    /// TCP address NMEA clients connect to
    #[arg(long, env = "NMEA_RELAY_DELIVERY_ADDR", default_value = "0.0.0.0:2000")]
    delivery_addr: SocketAddr,

    /// Sentences buffered per client host
    #[arg(long, env = "NMEA_RELAY_BUFFER_CAPACITY", default_value_t = 50)]
    buffer_capacity: usize,

    /// Maximum simultaneous TCP clients (0 = unlimited)
    #[arg(long, env = "NMEA_RELAY_MAX_CONNECTIONS", default_value_t = 0)]
    max_connections: usize,

    /// Terminate every sentence with CRLF
    #[arg(long, env = "NMEA_RELAY_CRLF")]
    crlf: bool,

    /// Forget client hosts that have been gone this long (seconds)
    #[arg(long, env = "NMEA_RELAY_IDLE_EVICTION_SECS")]
    idle_eviction_secs: Option<u64>,

    /// How long shutdown waits for the listeners (seconds)
    #[arg(long, env = "NMEA_RELAY_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    shutdown_timeout_secs: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "NMEA_RELAY_LOG", default_value = "info")]
    log_level: String,
}

impl Args {
    fn relay_config(&self) -> RelayConfig {
        let mut registry = RegistryConfig::default().buffer_capacity(self.buffer_capacity);
        if let Some(secs) = self.idle_eviction_secs {
            registry = registry.idle_eviction(Duration::from_secs(secs));
        }

        RelayConfig::default()
            .ingest_addr(self.ingest_addr)
            .delivery_addr(self.delivery_addr)
            .max_connections(self.max_connections)
            .append_crlf(self.crlf)
            .shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
            .registry(registry)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .compact()
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "nmea-relay starting");

    let relay = Relay::new(args.relay_config());
    let mut states = relay.subscribe_state();

    let run = relay.run_until(shutdown_signal());
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        stopping = states.wait_for(|state| *state == RelayState::Stopping) => {
            drop(stopping);
            // A second signal while stopping falls back to the default
            // behaviour of ending the process
            tokio::select! {
                result = &mut run => result,
                _ = shutdown_signal() => {
                    warn!("Second shutdown signal, exiting immediately");
                    return ExitCode::from(130);
                }
            }
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "nmea-relay exited with error");
            ExitCode::FAILURE
        }
    }
}
