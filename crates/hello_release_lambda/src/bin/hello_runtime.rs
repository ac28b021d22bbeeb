use std::sync::Arc;

use hello_release_lambda::handlers::hello::{handle_hello_event, ApiGatewayResponse, HelloConfig};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

async fn handle_request(
    event: LambdaEvent<Value>,
    config: Arc<HelloConfig>,
) -> Result<ApiGatewayResponse, Error> {
    Ok(handle_hello_event(&event.payload, &config))
}

fn init_logging() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging();

    let config = Arc::new(HelloConfig::from_env()?);
    tracing::info!(stage_name = %config.stage_name, "hello runtime starting");

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        handle_request(event, Arc::clone(&config))
    }))
    .await
}
