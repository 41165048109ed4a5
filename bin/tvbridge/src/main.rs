use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use directories::ProjectDirs;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tvbridge_auth_server::{AuthState, GatewayConfig};
use tvbridge_stream_server::{RestartPolicy, StreamConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Sets the IP address to bind the server to
    #[arg(long, default_value = "0.0.0.0", env = "TVBRIDGE_HOST")]
    host: Ipv4Addr,

    /// Sets the port to bind the server to
    #[arg(long, default_value_t = 8080, env = "TVBRIDGE_PORT")]
    port: u16,

    /// Overrides the platform data directory
    #[arg(long, env = "TVBRIDGE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Where sessions keep their manifest and segment files
    /// (defaults to <data-dir>/segments)
    #[arg(long, env = "TVBRIDGE_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Transcoder binary to launch
    #[arg(long, default_value = "ffmpeg", env = "TVBRIDGE_FFMPEG")]
    ffmpeg: PathBuf,

    /// Public domain used in authorize/revoke links
    #[arg(long, default_value = "localhost", env = "TVBRIDGE_DOMAIN")]
    domain: String,

    /// Full ntfy topic URL for unauthorized-access alerts (disabled when unset)
    #[arg(long, env = "TVBRIDGE_NTFY")]
    ntfy: Option<String>,

    /// Initial delay in milliseconds between transcoder relaunches
    /// (unset means relaunch immediately, the default policy)
    #[arg(long, env = "TVBRIDGE_RESTART_BACKOFF_MS")]
    restart_backoff_ms: Option<u64>,

    /// Stop a session after this many transcoder relaunches
    #[arg(long, conflicts_with = "restart_backoff_ms", env = "TVBRIDGE_MAX_RESTARTS")]
    max_restarts: Option<u32>,
}

impl Cli {
    fn restart_policy(&self) -> RestartPolicy {
        match (self.restart_backoff_ms, self.max_restarts) {
            (Some(ms), _) => RestartPolicy::Backoff {
                initial: Duration::from_millis(ms),
                max: Duration::from_secs(30),
            },
            (None, Some(max_restarts)) => RestartPolicy::CircuitBreaker { max_restarts },
            (None, None) => RestartPolicy::Immediate,
        }
    }
}

fn resolve_data_dir(cli: &Cli) -> PathBuf {
    if let Some(dir) = &cli.data_dir {
        return dir.clone();
    }

    let proj_dirs =
        ProjectDirs::from("", "", "tvbridge").expect("Could not determine home directory");
    proj_dirs.data_dir().to_path_buf()
}

#[tokio::main]
async fn main() {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let env_filter = match rust_log.is_empty() {
        true => EnvFilter::builder().parse_lossy("info"),
        false => EnvFilter::builder().parse_lossy(rust_log),
    };
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let data_dir = resolve_data_dir(&cli);
    std::fs::create_dir_all(&data_dir).expect("Failed to create data directory");
    let work_dir = cli
        .work_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("segments"));
    std::fs::create_dir_all(&work_dir).expect("Failed to create work directory");

    info!("Using data directory: {}", data_dir.display());
    info!("Using segment directory: {}", work_dir.display());

    let library =
        tvbridge_library_server::open_library(&data_dir).expect("Failed to open channel library");
    let auth = AuthState::new(data_dir.clone());

    let mut stream_config = StreamConfig::new(work_dir, cli.ffmpeg.clone());
    stream_config.restart_policy = cli.restart_policy();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest(
            "/api/auth",
            tvbridge_auth_server::create_router(
                auth,
                GatewayConfig {
                    domain: cli.domain.clone(),
                    ntfy_url: cli.ntfy.clone(),
                },
            ),
        )
        .nest(
            "/api/library",
            tvbridge_library_server::create_router(library.clone()),
        )
        .merge(tvbridge_stream_server::create_router(
            stream_config,
            Arc::new(library),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from((cli.host, cli.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    info!("tvbridge running at http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server failed");
}
