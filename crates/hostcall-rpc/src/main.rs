//! Hostcall RPC Server - exposes a single-threaded host application over RPC.
//!
//! The process main thread plays the host's main thread: it owns the demo
//! application's state and runs the main loop. The RPC server and its tokio
//! runtime live on a separate network thread, and every remote call is
//! marshaled back onto the main thread.

mod host;

use anyhow::{anyhow, Result};
use clap::Parser;
use hostcall_core::{
    channel, MainThreadService, RpcServer, ServerConfig, Service, ShutdownToken, SlaveService,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "hostcall-rpc")]
#[command(about = "RPC server that runs remote calls on the host's main thread")]
struct Args {
    /// Port to listen on (default 54444, 0 = auto-assign)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (default localhost)
    #[arg(long)]
    host: Option<String>,

    /// Give up waiting for the main thread after this many seconds
    #[arg(long)]
    wait_timeout_secs: Option<u64>,

    /// Allow access to attributes starting with an underscore
    #[arg(long)]
    allow_private_attrs: bool,

    /// JSON server config; command-line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = &self.host {
            config.hostname = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.wait_timeout_secs.is_some() {
            config.wait_timeout_secs = self.wait_timeout_secs;
        }
        if self.allow_private_attrs {
            config.access.allow_private_attrs = true;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting hostcall RPC server");

    let config = args.server_config()?;

    let (queue, mut main_loop) = channel();
    let queue = match config.wait_timeout() {
        Some(timeout) => queue.with_wait_timeout(timeout),
        None => queue,
    };

    // Host state is bound to this thread.
    let root = host::demo_root();
    let base = SlaveService::new(root).with_policy(config.access.clone());
    let service: Arc<dyn Service> =
        Arc::new(MainThreadService::new(base, Arc::new(queue.clone())));

    let token = ShutdownToken::new();
    let network = {
        let token = token.clone();
        let queue = queue.clone();
        thread::Builder::new()
            .name("rpc-network".to_string())
            .spawn(move || {
                let result = serve(service, config);
                if let Err(e) = &result {
                    error!("Server failed: {:#}", e);
                }
                token.trigger();
                queue.shutdown();
                result
            })?
    };

    main_loop.run_until(&token);
    let stats = main_loop.stats();
    info!(
        "Main loop stopped after {} jobs ({} panicked)",
        stats.executed, stats.panicked
    );

    network
        .join()
        .map_err(|_| anyhow!("network thread panicked"))?
}

fn serve(service: Arc<dyn Service>, config: ServerConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("rpc-worker")
        .build()?;

    runtime.block_on(async move {
        let mut server = RpcServer::start(service, &config).await?;

        // Print port for launchers to read (intentional stdout)
        println!("RPC_PORT={}", server.port());
        info!("Server has started on {}", server.addr());

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");

        server.shutdown();
        info!("Server has stopped");
        Ok::<_, anyhow::Error>(())
    })?;

    // Requests still waiting on the main thread finish before the runtime goes.
    runtime.shutdown_timeout(Duration::from_secs(5));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["hostcall-rpc"]);
        let config = args.server_config().unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.port, 54444);
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"hostname": "0.0.0.0", "port": 9000, "wait_timeout_secs": 5}}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = Args::parse_from([
            "hostcall-rpc",
            "--config",
            &path,
            "--port",
            "0",
            "--allow-private-attrs",
        ]);
        let config = args.server_config().unwrap();
        assert_eq!(config.hostname, "0.0.0.0");
        assert_eq!(config.port, 0);
        assert_eq!(config.wait_timeout_secs, Some(5));
        assert!(config.access.allow_private_attrs);
    }

    #[test]
    fn test_missing_config_file() {
        let args = Args::parse_from(["hostcall-rpc", "--config", "/nonexistent/config.json"]);
        assert!(args.server_config().is_err());
    }
}
