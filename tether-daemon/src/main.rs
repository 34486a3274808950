//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;
mod ipserver;
mod netd;
mod netlink;

use clap::{App, Arg};
use config::{Config, LoggingFileRotation, LoggingFmtStyle};
use nix::unistd::Uid;
use tether_core::config::TetheringConfig;
use tether_core::master;
use tether_core::offload::NoopOffload;
use tether_utils::ibus;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

fn init_tracing(config: &config::Logging) {
    // Enable logging to journald.
    let journald = config.journald.enabled.then(|| {
        tracing_journald::layer().expect("couldn't connect to journald")
    });

    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender = match config.file.rotation {
            LoggingFileRotation::Never => {
                rolling::never(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Hourly => {
                rolling::hourly(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Daily => {
                rolling::daily(&config.file.dir, &config.file.name)
            }
        };

        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_thread_ids(config.file.fmt.show_thread_id)
            .with_file(config.file.fmt.show_source)
            .with_line_number(config.file.fmt.show_source)
            .with_ansi(config.file.fmt.colors);
        let layer = match config.file.fmt.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(config.stdout.fmt.show_thread_id)
            .with_file(config.stdout.fmt.show_source)
            .with_line_number(config.stdout.fmt.show_source)
            .with_ansi(config.stdout.fmt.colors);
        let layer = match config.stdout.fmt.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    // Configure the tracing fmt layer.
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("tether=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(journald)
        .with(file)
        .with(stdout)
        .init();
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("Tethering control-plane daemon")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config");
    let config = Config::load(config_file);

    // Check for root privileges (sysctl and netlink mutations).
    if !Uid::effective().is_root() {
        eprintln!("need privileged user");
        std::process::exit(1);
    }

    // Initialize tracing.
    init_tracing(&config.logging);

    // Compile the tethering configuration.
    let tethering_config = match TetheringConfig::new(config.tethering.clone())
    {
        Ok(tethering_config) => tethering_config,
        Err(error) => {
            error!(%error, "invalid tethering configuration");
            std::process::exit(1);
        }
    };

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // We're ready to go!
    info!("starting up");

    // Main loop.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async {
            run(config, tethering_config).await;
        });
}

async fn run(config: Config, tethering_config: TetheringConfig) {
    // Create the control-plane channels.
    let (ibus_tx, ibus_rx) = mpsc::unbounded_channel();
    let (links_tx, links_rx) = ibus::link_channels();

    // Initialize the netlink sockets.
    let (nl_handle, nl_monitor) = netlink::init();

    // Start the control plane.
    let netd = Box::new(netd::LinuxNetd::new(&config.netd));
    let factory =
        Box::new(ipserver::NetlinkIpServerFactory::new(nl_handle.clone()));
    let offload = Box::new(NoopOffload::default());
    let handle = master::start(
        tethering_config.clone(),
        netd,
        factory,
        offload,
        links_tx,
        ibus_rx,
    );

    // Start the link and route monitor.
    netlink::start(
        tethering_config,
        ibus_tx,
        nl_handle,
        nl_monitor,
        links_rx,
    );

    // Serve signals until asked to exit.
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to register SIGTERM");
    let mut sigint =
        signal(SignalKind::interrupt()).expect("failed to register SIGINT");
    let mut sigusr1 = signal(SignalKind::user_defined1())
        .expect("failed to register SIGUSR1");

    loop {
        tokio::select! {
            _ = sigterm.recv() => break,
            _ = sigint.recv() => break,
            _ = sigusr1.recv() => {
                // Dump the control-plane state.
                if let Some(snapshot) = handle.dump().await {
                    match serde_json::to_string_pretty(&snapshot) {
                        Ok(json) => info!("state dump:\n{}", json),
                        Err(error) => error!(%error, "failed to serialize state"),
                    }
                }
            }
        }
    }

    // Graceful teardown: stop every downstream before exiting.
    info!("shutting down");
    handle.stop_all_tethering();
    handle.shutdown();
}
