use snowflake_sql_gateway::{server, Credentials};

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    // Configuration is read per request; this only warns early about obvious gaps
    if let Err(e) = Credentials::from_env() {
        log::warn!("Queries will fail until the configuration is fixed: {e}");
    }

    let addr = std::env::var("GATEWAY_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_owned());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, server::router(server::env_lookup())).await
}
