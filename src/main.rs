use clap::Parser;
use dht_mqtt::app::{self, Chatter, Options, RunError};
use dht_mqtt::broker::{Broker, SilentBroker};
use dht_mqtt::output::csv::CsvRecorder;
use dht_mqtt::sensor::Sensor;
use std::panic::{self, PanicHookInfo};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(not(feature = "iio"))]
compile_error!("The `iio` feature is required to build the binary");

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn log_parameters(options: &Options) {
    info!("Starting dht-mqtt...");
    info!(
        idx = ?options.idx,
        broker = %options.broker,
        topic = %options.topic,
        device_type = %options.device_type,
        pin = options.pin,
        unit = %options.unit,
        poll = ?options.poll,
        max_update_time = ?options.max_update_time,
        filtering = options.filtering,
        "Parameters"
    );
    if options.idx.is_none() {
        warn!("No device index configured, payloads will carry a null idx");
    }
}

async fn open_sensor(options: &Options) -> Result<Box<dyn Sensor>, RunError> {
    let sensor =
        dht_mqtt::sensor::iio::IioSensor::open(options.device_type, &options.iio_device).await?;
    info!(device = %sensor.device(), path = %options.iio_device.display(), "Setup sensor success...");
    Ok(Box::new(sensor))
}

async fn connect_broker(options: &Options) -> Result<Box<dyn Broker>, RunError> {
    match options.mqtt_chatter {
        #[cfg(feature = "mqtt")]
        Chatter::Essential => {
            let broker = dht_mqtt::broker::mqtt::MqttBroker::connect(&options.mqtt_config()).await?;
            info!("Setup mqtt client success...");
            Ok(Box::new(broker))
        }
        #[cfg(not(feature = "mqtt"))]
        Chatter::Essential => {
            warn!("Built without the `mqtt` feature, not publishing");
            Ok(Box::new(SilentBroker))
        }
        Chatter::Silent => Ok(Box::new(SilentBroker)),
    }
}

/// Raise the shutdown flag on SIGINT or SIGTERM.
async fn wait_for_stop_signal(shutdown: watch::Sender<bool>) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }

    info!("Stop signal received, finishing current poll");
    let _ = shutdown.send(true);
}

/// Main application entry point.
///
/// This function:
/// 1. Opens the sensor
/// 2. Connects to the broker (unless chatter is silent)
/// 3. Installs the stop-signal listener
/// 4. Runs the poll loop until stopped or a fatal error occurs
async fn run(options: Options) -> Result<(), RunError> {
    log_parameters(&options);

    let mut sensor = open_sensor(&options).await?;
    let mut broker = match connect_broker(&options).await {
        Ok(broker) => broker,
        Err(e) => {
            sensor.close();
            return Err(e);
        }
    };

    let recorder = if options.logging.file {
        CsvRecorder::new(&options.log_dir, chrono::Local::now())
    } else {
        CsvRecorder::disabled()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_stop_signal(shutdown_tx));

    app::run(
        &options,
        sensor.as_mut(),
        broker.as_mut(),
        &recorder,
        shutdown_rx,
    )
    .await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, docker restart policies) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    if options.logging.stdout {
        init_logging();
    }

    match run(options).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
