use actix_server::ServerHandle;
use actix_web::{App, HttpServer, web::Data};
use anyhow::{Context, Result};
use bridge_ui::{
    api::{self, Api, DeviceContext},
    config::AppConfig,
    device::{DeviceSignal, HostDevice, HostDeviceConfig, LogUpdateNotifier},
    link_status::SharedLinkStatus,
    log_buffer::{BufferedLogger, LogBuffer},
    services::parameters::IniParameterStore,
};
use env_logger::{Builder, Env, Target};
use log::{debug, error, info, warn};
use std::{io::Write, sync::Arc};
use tokio::{
    signal::unix::{Signal, SignalKind, signal},
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};

enum ShutdownReason {
    Restart,
    Shutdown,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Restart => write!(f, "restarting device"),
            ShutdownReason::Shutdown => write!(f, "shutting down"),
        }
    }
}

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let log = initialize()?;

    let (signals, mut signal_rx) = broadcast::channel(8);

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    while let ShutdownReason::Restart =
        run_until_shutdown(&log, &signals, &mut signal_rx, &mut sigterm).await?
    {}

    Ok(())
}

fn initialize() -> Result<LogBuffer> {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    let logger = builder.target(Target::Stdout).build();
    let max_level = logger.filter();
    let log = LogBuffer::new(AppConfig::get().log_buffer_bytes);

    log::set_boxed_logger(Box::new(BufferedLogger::new(logger, log.clone())))
        .context("failed to install logger")?;
    log::set_max_level(max_level);

    info!(
        "module version: {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_SHORT_REV")
    );

    Ok(log)
}

async fn run_until_shutdown(
    log: &LogBuffer,
    signals: &broadcast::Sender<DeviceSignal>,
    signal_rx: &mut broadcast::Receiver<DeviceSignal>,
    sigterm: &mut Signal,
) -> Result<ShutdownReason> {
    info!("starting server");

    let (server_handle, mut server_task) = run_server(log, signals)?;

    let reason = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("ctrl-c received");
                break ShutdownReason::Shutdown;
            },
            _ = sigterm.recv() => {
                debug!("SIGTERM received");
                break ShutdownReason::Shutdown;
            },
            signal = signal_rx.recv() => match signal {
                Ok(DeviceSignal::Restart) => {
                    debug!("device restart requested");
                    break ShutdownReason::Restart;
                }
                Ok(DeviceSignal::StopListeners) => {
                    info!("bridge listeners stopped for firmware update");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("missed {skipped} device signals");
                }
                Err(RecvError::Closed) => {
                    error!("device signal channel closed");
                    break ShutdownReason::Shutdown;
                }
            },
            result = &mut server_task => {
                match result {
                    Ok(Ok(())) => debug!("server stopped normally"),
                    Ok(Err(e)) => error!("server stopped with error: {e}"),
                    Err(e) => error!("server task panicked: {e}"),
                }
                break ShutdownReason::Shutdown;
            },
        }
    };

    info!("{reason}");

    server_handle.stop(true).await;

    if matches!(reason, ShutdownReason::Shutdown) {
        info!("shutdown complete");
    }

    Ok(reason)
}

fn run_server(
    log: &LogBuffer,
    signals: &broadcast::Sender<DeviceSignal>,
) -> Result<(ServerHandle, JoinHandle<Result<(), std::io::Error>>)> {
    let config = AppConfig::get();

    let store = IniParameterStore::open(&config.paths.parameters_file)
        .context("failed to load parameters")?;

    let device = HostDevice::new(
        HostDeviceConfig {
            image_path: config.paths.firmware_image.clone(),
            free_sketch_space: config.device.firmware_space_bytes,
            flash_size_map: config.device.flash_size_map,
            flash_chip_id: config.device.flash_chip_id,
        },
        signals.clone(),
    );

    // counters start from zero after every restart
    let api = Api::new(DeviceContext {
        store: Box::new(store),
        device: Box::new(device),
        notifier: Box::new(LogUpdateNotifier),
        gcs: Arc::new(SharedLinkStatus::new()),
        vehicle: Arc::new(SharedLinkStatus::new()),
        log: Arc::new(log.clone()),
        restart_delay: config.ui.restart_delay,
    });

    let ui_port = config.ui.port;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(api.clone()))
            .configure(api::configure)
    })
    .workers(1)
    .bind(("0.0.0.0", ui_port))
    .context("failed to bind server")?
    .disable_signals()
    .run();

    Ok((server.handle(), actix_web::rt::spawn(server)))
}
