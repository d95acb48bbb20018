use crate::cli::args::{Args, BridgeArgs, Command, ConfigCommand, RelayArgs};
use crate::cli::output::{ConsoleWriter, OutputWriter, PortEntry};
use crate::core::bridge::{DialBridge, ListenBridge};
use crate::core::relay::RelayServer;
use crate::domain::config::{BridgeConfig, RelayConfig};
use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::config::{render, ConfigDocument, ConfigManager};
use crate::infrastructure::logging::init_logging;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Execute CLI command
pub async fn execute_command(args: Args) -> BridgeResult<()> {
    let writer = ConsoleWriter::new(args.output);

    if !args.quiet {
        init_logging(args.verbose)
            .map_err(|e| BridgeError::config(format!("Failed to initialize logging: {}", e)))?;
    }

    let config_manager = ConfigManager::new();

    match args.command {
        Command::Listen(bridge_args) => run_listen(bridge_args, &writer, &config_manager).await,
        Command::Dial(bridge_args) => run_dial(bridge_args, &writer, &config_manager).await,
        Command::Relay(relay_args) => run_relay(relay_args, &writer, &config_manager).await,
        Command::Ports => {
            let ports = serialport::available_ports()?;
            let entries: Vec<PortEntry> = ports.iter().map(PortEntry::from).collect();
            writer.write_ports(&entries)?;
            Ok(())
        }
        Command::Config(config_args) => execute_config_command(config_args.command, &writer, &config_manager),
        Command::Version => {
            writer.write_message(&format!("serbridge {}", env!("CARGO_PKG_VERSION")))?;
            Ok(())
        }
    }
}

async fn run_listen(args: BridgeArgs, writer: &ConsoleWriter, config_manager: &ConfigManager) -> BridgeResult<()> {
    let config = load_bridge_config(&args, config_manager)?;
    let bridge = ListenBridge::new(config);

    bridge.start().await?;
    writer.write_bridge_status(&bridge.status().await)?;

    shutdown_signal().await;
    info!("Shutdown requested");
    bridge.stop().await?;
    writer.write_bridge_status(&bridge.status().await)?;
    Ok(())
}

async fn run_dial(args: BridgeArgs, writer: &ConsoleWriter, config_manager: &ConfigManager) -> BridgeResult<()> {
    let config = load_bridge_config(&args, config_manager)?;
    let bridge = DialBridge::new(config);

    bridge.start().await?;
    writer.write_client_status(&bridge.status().await)?;

    let outcome = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown requested");
            Ok(())
        }
        outcome = bridge.wait() => outcome,
    };

    bridge.stop().await?;
    writer.write_client_status(&bridge.status().await)?;
    outcome
}

async fn run_relay(args: RelayArgs, writer: &ConsoleWriter, config_manager: &ConfigManager) -> BridgeResult<()> {
    let (mut config, _) = config_manager.load::<RelayConfig>(args.config.as_deref())?;
    if let Some(max_connections) = args.max_connections {
        config.clients.max_connections = max_connections;
        config.validate()?;
    }

    let server = RelayServer::new(config);
    server.start().await?;
    writer.write_server_status(&server.status())?;

    shutdown_signal().await;
    info!("Shutdown requested");
    server.stop().await?;
    writer.write_server_status(&server.status())?;
    Ok(())
}

/// Load the bridge configuration and apply command line overrides
fn load_bridge_config(args: &BridgeArgs, config_manager: &ConfigManager) -> BridgeResult<BridgeConfig> {
    let (mut config, _) = config_manager.load::<BridgeConfig>(args.config.as_deref())?;

    if let Some(port) = &args.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(listen_port) = args.listen_port {
        config.network.listen_port = listen_port;
    }
    if let Some(address) = &args.address {
        config.network.bind_address = address.clone();
    }

    config.validate()?;
    Ok(config)
}

fn execute_config_command(
    command: ConfigCommand,
    writer: &ConsoleWriter,
    config_manager: &ConfigManager,
) -> BridgeResult<()> {
    match command {
        ConfigCommand::Init { relay, path } => {
            let written = if relay {
                init_document::<RelayConfig>(config_manager, path)?
            } else {
                init_document::<BridgeConfig>(config_manager, path)?
            };
            writer.write_message(&format!("Configuration written to '{}'", written.display()))?;
            Ok(())
        }
        ConfigCommand::Validate { relay, file } => {
            let checked = if relay {
                validate_document::<RelayConfig>(config_manager, file.as_deref())
            } else {
                validate_document::<BridgeConfig>(config_manager, file.as_deref())
            };
            match checked {
                Ok(source) => {
                    writer.write_message(&format!("Configuration {} is valid", source))?;
                    Ok(())
                }
                Err(e) => {
                    writer.write_error(&format!("Configuration validation failed: {}", e))?;
                    Err(e)
                }
            }
        }
        ConfigCommand::Show { relay, config } => {
            if relay {
                show_document::<RelayConfig>(writer, config_manager, config.as_deref())
            } else {
                show_document::<BridgeConfig>(writer, config_manager, config.as_deref())
            }
        }
    }
}

fn init_document<T: ConfigDocument>(config_manager: &ConfigManager, path: Option<PathBuf>) -> BridgeResult<PathBuf> {
    let path = path.unwrap_or_else(|| PathBuf::from(T::FILE_NAME));
    config_manager.init_config::<T>(&path)?;
    Ok(path)
}

/// Returns a description of what was validated
fn validate_document<T: ConfigDocument>(config_manager: &ConfigManager, file: Option<&Path>) -> BridgeResult<String> {
    match file {
        Some(path) => {
            config_manager.validate_file::<T>(path)?;
            Ok(format!("file '{}'", path.display()))
        }
        None => match config_manager.load::<T>(None)? {
            (_, Some(path)) => Ok(format!("file '{}'", path.display())),
            (_, None) => {
                warn!("No {} found in the search path", T::FILE_NAME);
                Ok("defaults".to_string())
            }
        },
    }
}

fn show_document<T: ConfigDocument>(
    writer: &ConsoleWriter,
    config_manager: &ConfigManager,
    path: Option<&Path>,
) -> BridgeResult<()> {
    let (config, _) = config_manager.load::<T>(path)?;
    writer.write_config(&render(&config)?, &config)?;
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn manager_in(dir: &TempDir) -> ConfigManager {
        ConfigManager::with_search_dirs(vec![dir.path().to_path_buf()])
    }

    #[test]
    fn test_bridge_overrides_are_validated() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir);

        let args = BridgeArgs {
            port: Some("/dev/null".to_string()),
            baud: Some(9600),
            listen_port: Some(9100),
            ..BridgeArgs::default()
        };
        let config = load_bridge_config(&args, &manager).unwrap();
        assert_eq!(config.serial.port, "/dev/null");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.network.listen_port, 9100);

        let bad = BridgeArgs {
            baud: Some(12345),
            ..BridgeArgs::default()
        };
        assert!(matches!(
            load_bridge_config(&bad, &manager),
            Err(BridgeError::Config { .. })
        ));
    }

    #[test]
    fn test_init_then_validate() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir);
        let path = dir.path().join("relay.toml");

        let written = init_document::<RelayConfig>(&manager, Some(path.clone())).unwrap();
        assert_eq!(written, path);
        assert!(validate_document::<RelayConfig>(&manager, Some(&path)).is_ok());
        assert!(init_document::<RelayConfig>(&manager, Some(path)).is_err());
    }

    #[test]
    fn test_validate_reports_search_result() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir);
        assert_eq!(validate_document::<BridgeConfig>(&manager, None).unwrap(), "defaults");

        fs::write(dir.path().join("serbridge.toml"), "[serial]\nbaud_rate = 7\n").unwrap();
        assert!(validate_document::<BridgeConfig>(&manager, None).is_err());
    }
}
