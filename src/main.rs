//! The zone server process: configuration, wiring, lifecycle.
//!
//! Wiring is two-phase by design: the transport is constructed first, then
//! the managers receive it as capabilities. Redis backs both the
//! connection-token store and the event stream.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use towerwars_events::{spawn_publisher, RedisStream};
use towerwars_protocol::DEFAULT_PORT;
use towerwars_server::{RedisTokenValidator, StaticBonusProvider, ZoneServer, ZoneServerDeps};
use towerwars_transport::UdpTransport;

#[derive(Parser, Debug)]
#[command(name = "zone-server", version, about = "TowerWars authoritative zone server")]
struct Args {
    /// UDP port to listen on.
    #[arg(long, env = "TOWERWARS_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind.
    #[arg(long, env = "TOWERWARS_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    /// Redis connection string; backs the connection-token store and the
    /// event stream.
    #[arg(long, env = "TOWERWARS_REDIS_URL", default_value = "redis://127.0.0.1")]
    redis_url: String,

    /// Fixed simulation seed, for reproducing a run. Random if omitted.
    #[arg(long, env = "TOWERWARS_SEED")]
    seed: Option<u64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start the IO runtime")?;

    let (validator, stream) = runtime.block_on(async {
        let validator = RedisTokenValidator::connect(&args.redis_url).await?;
        let stream = RedisStream::connect(&args.redis_url).await?;
        anyhow::Ok((validator, stream))
    })?;

    let publisher = spawn_publisher(stream, runtime.handle());

    let addr = SocketAddr::new(args.bind, args.port);
    let transport =
        UdpTransport::bind(addr, runtime.handle()).context("failed to bind the UDP transport")?;

    let server = ZoneServer::new(ZoneServerDeps {
        transport,
        validator: Arc::new(validator),
        bonus_provider: Arc::new(StaticBonusProvider::new()),
        publisher,
        runtime: runtime.handle().clone(),
        seed: args.seed.unwrap_or_else(rand::random),
    });

    let shutdown = server.shutdown_handle();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            shutdown.shutdown();
        }
    });

    // The game loop owns this thread until shutdown.
    server.run();

    Ok(())
}
