//! Vault custody daemon
//!
//! ```text
//! --env <name>   load config/<name>.yaml (default: dev)
//! ```
//!
//! Starts the worker pool and the reconciliation poller, runs one recovery
//! pass for records left in flight by a previous process, then waits for
//! SIGINT / SIGTERM.

use anyhow::Context;

use vault_custody::config::AppConfig;
use vault_custody::logging::init_logging;
use vault_custody::runtime::CustodyRuntime;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env).with_context(|| format!("loading config for {}", env))?;
    let _log_guard = init_logging(&config);

    tracing::info!(
        env = %env,
        build = env!("GIT_HASH"),
        "Starting vault custody service"
    );

    let mut runtime = CustodyRuntime::from_config(&config)
        .await
        .context("building runtime")?;

    let report = runtime.recover().await.context("recovery pass")?;
    tracing::info!(?report, "Recovered in-flight records");

    runtime.start();

    let shutdown = runtime.shutdown_handle();
    shutdown.wait_for_signal().await;

    runtime.shutdown().await;
    Ok(())
}
