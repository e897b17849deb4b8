use std::sync::Arc;

use duet_chat::config::Config;
use duet_chat::probe::TransportProbe;
use duet_chat::server::Server;
use duet_chat::store::MemoryStore;
use duet_chat::tls;
use log::{error, info, warn};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let store = Arc::new(MemoryStore::new());
    let probe = TransportProbe::new(&config.socket_url, config.probe_timeout);
    let server = Server::new(store, probe);
    let routes = server.routes();
    let addr = config.socket_addr();

    let tls_paths = config.tls.as_ref().and_then(|paths| match tls::validate(paths) {
        Ok(chain) => {
            info!("Loaded TLS material ({} certificates)", chain);
            Some(paths)
        }
        Err(e) => {
            warn!("Failed to load TLS config: {}", e);
            None
        }
    });

    match tls_paths {
        Some(paths) => {
            info!("Starting secure server (HTTPS/WSS) on {}...", addr);
            warp::serve(routes)
                .tls()
                .cert_path(&paths.cert)
                .key_path(&paths.key)
                .run(addr)
                .await;
        }
        None => {
            info!("Starting server (HTTP/WS) on {}...", addr);
            warp::serve(routes).run(addr).await;
        }
    }
}
