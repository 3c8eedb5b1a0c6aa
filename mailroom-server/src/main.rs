use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use envconfig::Envconfig;
use tokio::net::TcpListener;
use tracing::{error, info};

use mailroom::config::Config;
use mailroom::database::Database;
use mailroom::supervisor::{self, Event, Supervisor};
use mailroom::{router, telemetry, SERVICE_NAME, SERVICE_VERSION};

common_alloc::used!();

#[derive(Parser)]
#[command(version, about = "Message-intake microservice")]
struct Args {
    /// Log file (stderr only when unset)
    #[arg(long)]
    log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = Config::init_from_env().expect("invalid configuration");

    let telemetry = telemetry::start(SERVICE_NAME, SERVICE_VERSION, &config)
        .expect("failed to bootstrap telemetry");

    // The command-line flag wins over the environment.
    let log_path = args
        .log
        .or_else(|| config.log_file_name.clone().map(PathBuf::from));
    let log_file = log_path.map(|path| {
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .unwrap_or_else(|err| panic!("cannot open log file {}: {err}", path.display()))
    });
    telemetry::init_logging(log_file, telemetry.tracer);

    info!(environment = %config.environment, "starting up");
    if config.trace_destination.is_none() {
        info!("trace export disabled");
    }
    if config.metrics_destination.is_none() {
        info!("metrics export disabled");
    }

    let db = Database::new(&config.database_url, config.max_db_connections)
        .await
        .expect("failed to open database");

    let listener = TcpListener::bind(config.bind())
        .await
        .expect("could not bind port");
    info!(
        "{} listening on {}",
        SERVICE_NAME,
        listener.local_addr().expect("listener has no local address")
    );

    let (events_tx, events_rx) = supervisor::channel();

    // The serve loop runs on its own task; a serve failure is reported as
    // a quit event rather than acted on in place.
    let app = router::router(db);
    let server_events = events_tx.clone();
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(error = %err, "http server exited");
            if server_events.send(Event::Quit(1)).await.is_err() {
                error!("supervisor event queue closed");
            }
        }
    });

    let code = Supervisor::new(events_tx, events_rx, telemetry.shutdown)
        .run()
        .await;

    // Returning instead of exiting lets the log file and pool close on the
    // normal drop path.
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
