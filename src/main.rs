//! # DutyRelay
//!
//! Watches on-call schedules, notifies people when their duty starts or
//! ends, and relays incoming alert webhooks to phone, SMS or chat.
//!
//! Usage:
//!   dutyrelay                              # serve with ~/.dutyrelay/config.toml
//!   dutyrelay --config ./relay.toml serve  # explicit config
//!   dutyrelay check-config                 # validate and list schedules
//!   dutyrelay user add U1 a@x.com --phone +15550001 --verified

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use relay_core::RelayConfig;
use relay_core::types::Identity;
use relay_gateway::AppState;
use relay_notify::{
    AuditSink, DeliveryContext, Dispatcher, HttpCallbackClient, IdentityResolver, SqliteAuditStore,
    SqliteDirectory,
};
use relay_roster::{DutyRegistry, OnCallApiSource, SchedulePoller};

#[derive(Parser)]
#[command(
    name = "dutyrelay",
    version,
    about = "📟 DutyRelay: on-call rotation tracker and notification relay"
)]
struct Cli {
    /// Config file (default: ~/.dutyrelay/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the poller, dispatcher and HTTP gateway (default)
    Serve,
    /// Load and validate the configuration, then exit
    CheckConfig,
    /// Manage the user directory
    User {
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Add or replace a user
    Add {
        id: String,
        email: String,
        #[arg(long, default_value = "")]
        username: String,
        #[arg(long)]
        phone: Option<String>,
        /// Mark the phone number as verified
        #[arg(long)]
        verified: bool,
        #[arg(long)]
        slack: Option<String>,
    },
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "dutyrelay=debug,relay_core=debug,relay_roster=debug,relay_notify=debug,relay_gateway=debug,tower_http=debug"
    } else {
        "dutyrelay=info,relay_roster=info,relay_notify=info,relay_gateway=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<RelayConfig> {
    let mut config = match &cli.config {
        Some(path) => RelayConfig::load_from(path)?,
        None => RelayConfig::load()?,
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);
    let config = load_config(&cli).context("invalid configuration")?;

    match cli.command {
        None | Some(Command::Serve) => serve(config).await,
        Some(Command::CheckConfig) => check_config(&config),
        Some(Command::User { action }) => user(&config, action),
    }
}

fn check_config(config: &RelayConfig) -> Result<()> {
    println!("✅ Configuration OK");
    println!("   🌐 Gateway:   {}:{}", config.server.host, config.server.port);
    println!(
        "   ⏱️  Poller:    {} (every {}s)",
        if config.poller.enabled { "enabled" } else { "disabled" },
        config.poller.interval_secs
    );
    println!("   📮 Transport: {}", config.transport.kind);
    println!("   📋 Schedules: {}", config.schedules.len());
    for schedule in &config.schedules {
        match &schedule.callback_url {
            Some(url) => println!("      - {} → {} {url}", schedule.name, schedule.transport),
            None => println!("      - {} → {}", schedule.name, schedule.transport),
        }
    }
    Ok(())
}

fn user(config: &RelayConfig, action: UserAction) -> Result<()> {
    let directory = SqliteDirectory::open(&config.identity.directory_db_path())?;
    match action {
        UserAction::Add {
            id,
            email,
            username,
            phone,
            verified,
            slack,
        } => {
            let mut identity = Identity::new(&id, &email);
            identity.username = username;
            identity.slack_user_id = slack;
            if let Some(phone) = phone {
                identity = identity.with_phone(&phone, verified);
            }
            directory.upsert_user(&identity)?;
            println!("✅ User {id} <{email}> saved");
        }
    }
    Ok(())
}

async fn serve(config: RelayConfig) -> Result<()> {
    tracing::info!("📟 DutyRelay v{}", env!("CARGO_PKG_VERSION"));

    // Audit log
    let (audit_tx, audit_rx) = watch::channel(false);
    let (audit, audit_log, audit_task) = if config.audit.enabled {
        let store = Arc::new(SqliteAuditStore::open(&config.audit.db_path())?);
        let (sink, writer) = AuditSink::new(config.audit.buffer_capacity, store.clone());
        let task = tokio::spawn(writer.run(audit_rx, config.audit.flush_grace()));
        (sink, Some(store), Some(task))
    } else {
        tracing::info!("📝 Audit log disabled");
        (AuditSink::disabled(), None, None)
    };

    // Identity + delivery
    let directory = Arc::new(SqliteDirectory::open(&config.identity.directory_db_path())?);
    let resolver = Arc::new(
        IdentityResolver::new(directory.clone())
            .with_lookup_timeout(config.identity.lookup_timeout())
            .with_max_age(config.identity.cache_max_age()),
    );
    let delivery_timeout = config.dispatcher.delivery_timeout();
    let transport = relay_notify::transport::from_config(&config.transport, delivery_timeout)?;
    tracing::info!("📮 Transport: {}", transport.name());
    let (dispatcher, worker) = Dispatcher::new(
        &config.dispatcher,
        DeliveryContext {
            resolver: resolver.clone(),
            transport,
            callback: Arc::new(HttpCallbackClient::new(delivery_timeout)?),
            audit: audit.clone(),
        },
    );
    let (dispatch_tx, dispatch_rx) = watch::channel(false);
    let dispatch_task = tokio::spawn(worker.run(dispatch_rx));

    // Schedule polling
    let poller = if !config.poller.enabled {
        tracing::info!("⏱️ Poller disabled");
        None
    } else if config.schedules.is_empty() || config.oncall.url.is_empty() {
        tracing::warn!("⏱️ Poller enabled but no schedules or oncall.url configured, not polling");
        None
    } else {
        let source = Arc::new(OnCallApiSource::new(&config.oncall, config.poller.fetch_timeout())?);
        let poller = Arc::new(SchedulePoller::new(
            source,
            Arc::new(DutyRegistry::new()),
            dispatcher.clone(),
            &config.poller,
            config.templates.clone(),
        ));
        poller.start(config.schedules.clone()).await;
        Some(poller)
    };

    // HTTP gateway
    let (gateway_tx, gateway_rx) = watch::channel(false);
    let state = AppState {
        dispatcher,
        resolver,
        directory,
        poller: poller.clone(),
        audit,
        audit_log,
        errors_as_ok: config.server.errors_as_ok,
        start_time: Instant::now(),
    };
    let server_config = config.server.clone();
    let mut gateway = tokio::spawn(async move { relay_gateway::start(&server_config, state, gateway_rx).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("🛑 Shutdown requested"),
        result = &mut gateway => {
            match result {
                Ok(Ok(())) => tracing::warn!("🌐 Gateway exited"),
                Ok(Err(e)) => tracing::error!("🌐 Gateway failed: {e}"),
                Err(e) => tracing::error!("🌐 Gateway task panicked: {e}"),
            }
        }
    }

    // Poller first, then the queue, then the audit buffer.
    let _ = gateway_tx.send(true);
    if let Some(poller) = &poller {
        poller.stop().await;
    }
    if !gateway.is_finished() {
        let _ = gateway.await;
    }
    let _ = dispatch_tx.send(true);
    if let Err(e) = dispatch_task.await {
        tracing::error!("📮 Dispatcher task ended abnormally: {e}");
    }
    let _ = audit_tx.send(true);
    if let Some(task) = audit_task {
        let _ = task.await;
    }

    tracing::info!("👋 DutyRelay stopped");
    Ok(())
}
