// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Streaming agent CLI entry point
//!
//! Opens the streaming port, forwards cursor changes and runs the capture
//! loop until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;

use streaming_agent::{
    Agent, AgentConfig, ConfigureOption, FrameLog, MissingBackendPolicy, PluginRegistry, QuitFlag,
    StreamPort, DEFAULT_PORT_PATH,
};

fn cli() -> Command {
    Command::new("streaming-agent")
        .version(env!("CARGO_PKG_VERSION"))
        .author("streaming-agent Authors")
        .about("Streams captured frames and cursor updates over a virtio stream port")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PATH")
                .default_value(DEFAULT_PORT_PATH)
                .help("Path to the streaming port device"),
        )
        .arg(
            Arg::new("log-frames")
                .short('l')
                .long("log-frames")
                .value_name("PATH")
                .help("Log frames and timing information to a file"),
        )
        .arg(
            Arg::new("log-binary")
                .long("log-binary")
                .action(ArgAction::SetTrue)
                .help("Write raw frame data to the frame log"),
        )
        .arg(
            Arg::new("log-frame-data")
                .long("log-frame-data")
                .action(ArgAction::SetTrue)
                .help("Hexdump frame contents in the text frame log"),
        )
        .arg(
            Arg::new("option")
                .short('c')
                .long("option")
                .value_name("NAME=VALUE")
                .action(ArgAction::Append)
                .help("Option passed to capture plugins (repeatable)"),
        )
        .arg(
            Arg::new("missing-backend")
                .long("missing-backend")
                .value_name("POLICY")
                .value_parser(["fatal", "await-next-start"])
                .default_value("fatal")
                .help("What to do when no capture plugin fits the requested codecs"),
        )
        .arg(
            Arg::new("no-cursor")
                .long("no-cursor")
                .action(ArgAction::SetTrue)
                .help("Do not forward cursor shape changes"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
}

fn config_from_matches(matches: &ArgMatches) -> anyhow::Result<AgentConfig> {
    let mut config = AgentConfig::default();

    if let Some(port) = matches.get_one::<String>("port") {
        config.port_path = PathBuf::from(port);
    }
    config.log_frames = matches.get_one::<String>("log-frames").map(PathBuf::from);
    config.log_binary = matches.get_flag("log-binary");
    config.log_frame_data = matches.get_flag("log-frame-data");
    config.enable_cursor = !matches.get_flag("no-cursor");
    config.debug = matches.get_flag("debug");

    if let Some(policy) = matches.get_one::<String>("missing-backend") {
        config.missing_backend = policy
            .parse::<MissingBackendPolicy>()
            .map_err(|e| anyhow!(e))?;
    }

    if let Some(options) = matches.get_many::<String>("option") {
        for arg in options {
            let option = ConfigureOption::parse(arg)
                .ok_or_else(|| anyhow!("invalid plugin option '{arg}', expected NAME=VALUE"))?;
            config.plugin_options.push(option);
        }
    }

    Ok(config)
}

#[cfg(all(target_os = "linux", feature = "x11"))]
fn start_cursor_updater(
    port: &Arc<StreamPort>,
    quit: &QuitFlag,
) -> anyhow::Result<Option<streaming_agent::CursorUpdater>> {
    use streaming_agent::{CursorUpdater, X11CursorSource};

    let source = X11CursorSource::new().context("failed to set up cursor updates")?;
    let updater = CursorUpdater::spawn(port.clone(), Box::new(source), quit.clone())?;
    Ok(Some(updater))
}

#[cfg(not(all(target_os = "linux", feature = "x11")))]
fn start_cursor_updater(
    _port: &Arc<StreamPort>,
    _quit: &QuitFlag,
) -> anyhow::Result<Option<streaming_agent::CursorUpdater>> {
    warn!("cursor updates are not supported by this build");
    Ok(None)
}

fn run() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    // the logger comes first so configuration errors are reported
    let config = config_from_matches(&matches);
    let log_level = match &config {
        Ok(config) if config.debug => LevelFilter::Debug,
        _ => LevelFilter::Info,
    };
    SimpleLogger::new()
        .with_level(log_level)
        .init()
        .context("failed to initialise logging")?;

    let config = config?;

    info!("Starting streaming-agent with config: {config:?}");

    let quit = QuitFlag::new();
    let handler_quit = quit.clone();
    ctrlc::set_handler(move || {
        info!("got a termination signal, exiting");
        handler_quit.request();
    })
    .context("failed to register signal handler")?;

    let mut registry = PluginRegistry::new();
    for option in &config.plugin_options {
        registry.add_option(&option.name, &option.value);
    }
    if registry.is_empty() {
        warn!("no capture plugins registered, start requests cannot be served");
    }

    let mut agent = Agent::new(registry, config.missing_backend);
    if let Some(path) = &config.log_frames {
        let frame_log = FrameLog::open(path, config.log_binary, config.log_frame_data)
            .with_context(|| format!("failed to open log file '{}'", path.display()))?;
        agent = agent.with_frame_log(frame_log);
    }

    let port = Arc::new(StreamPort::open(&config.port_path)?);

    let cursor = if config.enable_cursor {
        start_cursor_updater(&port, &quit)?
    } else {
        None
    };

    let result = agent.capture_loop(&port, &quit);

    quit.request();
    if let Some(cursor) = cursor {
        cursor.join();
    }

    result.context("streaming failed")?;
    info!("streaming-agent stopped");
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
