use axum::Router;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use termgate_host::config::Config;
use termgate_host::store::Store;
use termgate_host::vault::Vault;
use termgate_host::{api, ws, Gateway};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Resolve the vault/token key material. A missing key gets an ephemeral
/// replacement so development still works, with a loud warning: tokens and
/// stored credentials will not survive a restart.
fn resolve_secret_key(config: &Config) -> String {
    if let Some(key) = &config.auth.secret_key {
        if !key.is_empty() {
            return key.clone();
        }
    }
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    tracing::warn!(
        "TERMGATE_SECRET_KEY is not set; using an ephemeral key. \
         Stored credentials will be unreadable after restart."
    );
    hex::encode(bytes)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "--version" | "-v" => {
                println!("termgate {VERSION}");
                return Ok(());
            }
            "--help" | "-h" => {
                println!("termgate - browser-to-SSH gateway");
                println!();
                println!("USAGE:");
                println!("    termgate [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version");
                println!();
                println!("CONFIG:");
                println!("    ~/.config/termgate/config.toml");
                println!("    TERMGATE_* environment variables override the file");
                return Ok(());
            }
            _ => {}
        }
    }

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = Config::load();
    tracing::info!(version = VERSION, "starting termgate");

    let db_path = config
        .server
        .db_path
        .clone()
        .unwrap_or_else(Store::default_db_path);
    let store = Store::open(&db_path)?;
    tracing::info!(db = %db_path.display(), "store opened");

    let secret = resolve_secret_key(&config);
    let vault = Vault::new(&secret);

    let http_addr = format!("{}:{}", config.server.bind, config.server.http_port);
    let ws_port = config.server.ws_port;
    let gateway = Gateway::new(config, store, vault);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = Router::new()
        .nest("/api", api::api_router())
        .layer(cors)
        .with_state(gateway.clone());

    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;
    tracing::info!(addr = %http_addr, "admission API listening");
    let http_server = axum::serve(http_listener, app);

    let shutdown = async {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }
        tracing::info!("shutdown requested");
    };

    tokio::select! {
        result = ws::serve(gateway.clone(), ws_port) => {
            result?;
        }
        result = http_server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        () = shutdown => {}
    }

    Ok(())
}
