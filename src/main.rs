use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use campusd::db;
use campusd::http::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "campusd", about = "school assessment and report service")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:5050")]
    addr: String,
    #[arg(long, default_value = "campus-data")]
    data_dir: PathBuf,
    /// Defaults to <data-dir>/generated_reports.
    #[arg(long)]
    reports_dir: Option<PathBuf>,
    /// Workbook generation bound, in seconds.
    #[arg(long, default_value_t = 30)]
    report_timeout: u64,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    let addr: SocketAddr = match args.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %args.addr);
            return;
        }
    };

    // Create the schema up front so the first request doesn't pay for it.
    if let Err(err) = db::open_db(&args.data_dir) {
        error!(event = "schema_init_failed", error = %err);
        return;
    }

    let reports_dir = args
        .reports_dir
        .clone()
        .unwrap_or_else(|| args.data_dir.join("generated_reports"));
    if let Err(err) = std::fs::create_dir_all(&reports_dir) {
        error!(event = "reports_dir_failed", error = %err);
        return;
    }

    let state = AppState {
        data_dir: args.data_dir.clone(),
        reports_dir,
        report_timeout: Duration::from_secs(args.report_timeout),
    };
    let app = http::router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "bind_failed", error = %err, addr = %addr);
            return;
        }
    };

    info!(event = "listen", addr = %addr, data_dir = %args.data_dir.display());

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        error!(event = "serve_failed", error = %err);
    }
}
