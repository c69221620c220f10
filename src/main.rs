use color_eyre::{eyre::eyre, Result};
use switch_remote::{SwitchConfig, SwitchRemote};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = SwitchConfig::default_path();
    let config = SwitchConfig::load_or_default(&path)
        .await
        .map_err(|e| eyre!("Failed to load config from {}: {}", path.display(), e))?;

    let mut remote = SwitchRemote::from_config(&config)?;
    let mut state = remote.subscribe();

    remote
        .connect()
        .map_err(|e| eyre!("Failed to start connection: {}", e))?;

    info!("Monitoring switch, press Ctrl-C to quit");
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    warn!("State channel closed");
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                match &snapshot.last_error {
                    Some(err) if !snapshot.is_connected() => {
                        warn!("Connection {} (last error: {})", snapshot.connection, err)
                    }
                    _ => info!(
                        "Connection {}, power {:?}",
                        snapshot.connection, snapshot.power
                    ),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    remote.disconnect().await;
    info!("Disconnected");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
