use anyhow::Result;
use tokio::task::JoinSet;

use bookwire_server::config::Config;
use bookwire_server::store;
use bookwire_server::transport::{Transport, broker::BrokerTransport, http::HttpTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let config = Config::from_env_and_args()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("bookwire={}", config.log_level).parse()?)
                .add_directive(format!("bookwire_server={}", config.log_level).parse()?),
        )
        .init();

    // One dispatcher shared by every transport
    let dispatcher = store::create_dispatcher(&config)?;

    // Create a set to manage multiple transport tasks
    let mut transport_tasks = JoinSet::new();

    // Start AMQP consumers if enabled
    if let Some(amqp_config) = &config.transports.amqp {
        let dispatcher = dispatcher.clone();
        let url = amqp_config.url.clone();
        let workers = amqp_config.workers;

        transport_tasks.spawn(async move {
            tracing::info!(
                "Starting AMQP transport with {} worker(s) on {}",
                workers,
                dispatcher.config().request_queue
            );
            let transport = BrokerTransport::amqp(url, workers);
            transport.start(dispatcher).await
        });
    }

    // Start HTTP transport if enabled
    if let Some(http_config) = &config.transports.http {
        let dispatcher = dispatcher.clone();
        let host = http_config.host.clone();
        let port = http_config.port;

        transport_tasks.spawn(async move {
            tracing::info!("Starting HTTP transport on {}:{}", host, port);
            let transport = HttpTransport::new(&host, port)?;
            transport.start(dispatcher).await
        });
    }

    tracing::info!(
        "Bookwire server started: {} requests per {}s per client",
        config.rate_limit.quota,
        config.rate_limit.window.as_secs()
    );
    tracing::info!(
        "Store capacity: {}, idempotency TTL: {}s",
        config.store.capacity,
        config.idempotency.ttl.as_secs()
    );

    // Wait for all transport tasks to complete (they run indefinitely)
    while let Some(result) = transport_tasks.join_next().await {
        match result {
            Ok(Ok(())) => {
                tracing::info!("Transport task completed successfully");
            }
            Ok(Err(e)) => {
                tracing::error!("Transport task failed: {}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::error!("Transport task panicked: {}", e);
                return Err(anyhow::anyhow!("Transport task panicked"));
            }
        }
    }

    Ok(())
}
