use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use kitero_binder::{LinuxBinder, LinuxBinderConfig, PersistentBinder};
use kitero_core::{default_config, merge, Router, RouterDoc};
use kitero_rpc::RpcServer;

mod cli;
mod logging;

use cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli)?;

    run(&cli).inspect_err(|err| tracing::error!(error = %err, "kitero-helper exiting on unhandled error"))
}

fn run(cli: &Cli) -> Result<()> {
    tracing::info!(path = %cli.config.display(), "reading configuration file");
    let raw = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("reading configuration file {:?}", cli.config))?;
    let overlay: serde_yaml::Value =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {:?} as YAML", cli.config))?;
    let config = merge(&default_config(), &overlay);

    let router_section = config.get("router").context("configuration is missing a 'router' section")?;
    let router_doc = RouterDoc::from_yaml(router_section)?;
    let mut router = Router::load(&router_doc)?;

    let helper = config.get("helper").cloned().unwrap_or(serde_yaml::Value::Null);
    let listen = helper
        .get("listen")
        .and_then(|v| v.as_str())
        .unwrap_or("127.0.0.1")
        .to_string();
    let port = helper.get("port").and_then(|v| v.as_u64()).unwrap_or(18861) as u16;
    let max_users = helper
        .get("max_users")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or_else(|| LinuxBinderConfig::default().max_users);
    let save_path = helper.get("save").and_then(|v| v.as_str()).map(str::to_string);

    if let Some(path) = save_path {
        let mut persistent = PersistentBinder::new(path);
        if let Err(err) = persistent.restore(&mut router) {
            tracing::warn!(error = %err, "unable to restore previous configuration");
        }
        router.register(Box::new(persistent));
    }

    router.register(Box::new(LinuxBinder::new(LinuxBinderConfig {
        max_users,
        ..LinuxBinderConfig::default()
    })));

    let router = Arc::new(Mutex::new(router));
    let server = RpcServer::bind((listen.as_str(), port))
        .with_context(|| format!("binding RPC listener on {listen}:{port}"))?;
    tracing::info!(%listen, port, "kitero-helper ready");
    server.serve(router)
}
