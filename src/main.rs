use std::sync::Arc;

use appendlog_broker::config::{BrokerConfig, ListenEndpoint};
use appendlog_broker::dispatcher::Dispatcher;
use appendlog_broker::server::grpc::BrokerService;
use tonic::transport::Server;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("BROKER_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let config_path = std::env::var("BROKER_CONFIG").ok().map(std::path::PathBuf::from);
    let config = BrokerConfig::load(config_path.as_deref())?;

    for root in &config.root_dirs {
        std::fs::create_dir_all(root)?;
    }

    let addr = primary_tcp_addr(&config)?;

    let dispatcher = Arc::new(Dispatcher::new(config));
    let service = BrokerService::new(dispatcher);

    info!(%addr, "broker listening");
    Server::builder()
        .add_service(service.into_server())
        .serve(addr)
        .await?;
    Ok(())
}

/// Only TCP endpoints are servable by `tonic::transport::Server::serve`;
/// Unix-socket endpoints are a config Open Question left unresolved for this
/// binary (see DESIGN.md).
fn primary_tcp_addr(config: &BrokerConfig) -> Result<std::net::SocketAddr, Box<dyn std::error::Error>> {
    for endpoint in &config.listen_endpoints {
        if let ListenEndpoint::Tcp { host, port } = endpoint {
            return Ok(format!("{host}:{port}").parse()?);
        }
    }
    Err("no TCP listen_endpoints configured".into())
}
