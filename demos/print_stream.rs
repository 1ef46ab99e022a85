//! Prints the metadata of every message from a `chainspy` subscription.
//!
//! Reads `OC_HTTP_URL`, `OC_WS_URL` and, optionally, `OC_API_KEY` from the
//! environment. Stop with Ctrl-C.

use std::error::Error;

use ocelloids_sdk::{ClientConfig, StreamClient, SubscriptionDescriptor};
use secrecy::SecretString;
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn config_from_env() -> ClientConfig {
    let defaults = ClientConfig::default();
    let mut config = ClientConfig::new(
        std::env::var("OC_HTTP_URL").unwrap_or(defaults.http_base_url),
        std::env::var("OC_WS_URL").unwrap_or(defaults.ws_base_url),
    );
    if let Ok(api_key) = std::env::var("OC_API_KEY") {
        config = config.with_api_key(SecretString::new(api_key));
    }
    config
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = StreamClient::new(config_from_env())?;
        let descriptor = SubscriptionDescriptor::new("chainspy").with_arg(
            "networks",
            json!(["urn:ocn:polkadot:0", "urn:ocn:polkadot:2034"]),
        );

        let closer = client.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                closer.close();
            }
        });

        let result = client
            .subscribe(&descriptor, |message| {
                if let Some(metadata) = message.metadata() {
                    println!(">> {metadata}");
                }
            })
            .await;

        match result {
            Ok(()) => println!("Stream ended"),
            Err(err) if err.is_cancelled() => println!("Stopped"),
            Err(err) => eprintln!("error: {err}"),
        }

        Ok::<(), Box<dyn Error>>(())
    })
}
