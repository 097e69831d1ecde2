use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use db_tunnel::config::{ConnectionStore, JsonConnectionStore};
use db_tunnel::ssh::RusshConnector;
use db_tunnel::{init_logging, ConnectionService, TestConnectionResult};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let mut args = std::env::args().skip(1);
    let (store, id) = match (args.next(), args.next()) {
        (Some(path), Some(id)) => (JsonConnectionStore::with_path(PathBuf::from(path)), id),
        (Some(id), None) => match JsonConnectionStore::open_default() {
            Ok(store) => (store, id),
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        _ => {
            eprintln!("usage: db-tunnel [connections.json] <connection-id>");
            return ExitCode::from(2);
        }
    };

    let config = match store.get_connection_config(&id).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            error!("No connection with id {}", id);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Failed to read {}: {}", store.path().display(), e);
            return ExitCode::FAILURE;
        }
    };

    let service = ConnectionService::new(Arc::new(store), Arc::new(RusshConnector));

    if let TestConnectionResult::Failure { error } = service.test_connection(&config).await {
        eprintln!("test failed: {}", error);
        return ExitCode::FAILURE;
    }

    let code = match service.connect(&id).await {
        Ok(_) => match service.current() {
            Some(active) => match serde_json::to_string(&active.info) {
                Ok(json) => {
                    println!("{}", json);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("Failed to encode connection info: {}", e);
                    ExitCode::FAILURE
                }
            },
            None => ExitCode::FAILURE,
        },
        Err(e) => {
            eprintln!("connect failed: {}", e);
            ExitCode::FAILURE
        }
    };

    service.shutdown().await;
    code
}
