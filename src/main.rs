//! R0N Embed demo binary: a greeting page and a WebSocket echo service.

use http::{Method, StatusCode};
use r0n_embed::config::{BasicValidator, ConfigLoader, LogFormat, ServerConfig};
use r0n_embed::module::{HandlerMap, WebModule};
use r0n_embed::modules::websocket_handler::{Message, SessionHandle, WebSocketBehavior};
use r0n_embed::server::WebServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Serves `GET /hello?name=...`.
struct Greeter {
    handlers: HandlerMap,
}

impl Greeter {
    fn new() -> Self {
        let mut handlers = HandlerMap::new();
        handlers.add("/hello", Method::GET, |_, http| {
            let name = http
                .request()
                .query()
                .and_then(|query| {
                    url::form_urlencoded::parse(query.as_bytes())
                        .find(|(key, _)| key == "name")
                        .map(|(_, value)| value.into_owned())
                })
                .unwrap_or_else(|| "world".to_string());
            http.respond_text(StatusCode::OK, format!("Hello, {name}!"));
            Ok(true)
        });
        Self { handlers }
    }
}

impl WebModule for Greeter {
    fn name(&self) -> &str {
        "greeter"
    }

    fn handlers(&self) -> &HandlerMap {
        &self.handlers
    }
}

/// Sends every message back to its sender.
struct Echo;

impl WebSocketBehavior for Echo {
    fn on_open(&mut self, session: &SessionHandle) {
        tracing::info!(session = %session.id(), remote = %session.remote_addr(), "Echo session open");
    }

    fn on_message(&mut self, session: &SessionHandle, message: Message) {
        if let Err(e) = session.send(&message) {
            tracing::debug!(session = %session.id(), error = %e, "Echo failed");
        }
    }
}

fn load_config() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let loader = ConfigLoader::new().with_validator(BasicValidator::new());
    match std::env::args().nth(1) {
        Some(path) => Ok(loader.load(path)?),
        None => Ok(loader.load_or_default("r0n-embed.toml")?),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("r0n_embed={}", config.logging.level).into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Full => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init(),
    }

    tracing::info!("r0n-embed v{} starting", env!("CARGO_PKG_VERSION"));

    let server = WebServer::new(config);
    server.register_module(Greeter::new());
    server.add_service("/echo", || Echo)?;

    let address = server.start().await?;
    tracing::info!(address = %address, "Try ws://{address}/echo or http://{address}/hello?name=you");

    tokio::signal::ctrl_c().await?;
    server.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
