//! REST API server demo
//!
//! Runs the full engine: dispatch consumer, scheduled batch execution and
//! recovery, and the REST API.
//!
//! ```text
//! cargo run --example server [config.json]
//! ```
//!
//! Without a config file (or one with no `auth.tokens`), a `demo` account is
//! created and the token `demo-token` authenticates it.
//!
//! After starting, you can:
//! - View Swagger UI at http://localhost:6790/swagger-ui
//! - Create tasks via POST http://localhost:6790/api/v1/download-tasks
//! - Stream events via GET http://localhost:6790/api/v1/events

use idm::config::{Config, StaticTokenConfig};
use idm::{Database, TaskEngine, run_with_shutdown};
use tracing_subscriber::EnvFilter;

const DEMO_ACCOUNT: &str = "demo";
const DEMO_TOKEN: &str = "demo-token";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,idm=debug")),
        )
        .init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if config.auth.tokens.is_empty() {
        let db = Database::new(&config.persistence.database_path).await?;
        let account = match db.find_account_by_name(DEMO_ACCOUNT).await? {
            Some(account) => account,
            None => db.create_account(DEMO_ACCOUNT).await?,
        };
        db.close().await;

        config.auth.tokens.push(StaticTokenConfig {
            token: DEMO_TOKEN.to_string(),
            account_id: account.id,
            expires_at: None,
        });
        tracing::info!(account_id = %account.id, token = DEMO_TOKEN, "Seeded demo account");
    }

    let bind_address = config.api.bind_address;
    let engine = TaskEngine::new(config).await?;

    engine.start_dispatch_consumer();
    engine.start_scheduler();
    let api = engine.spawn_api_server();

    println!("idm REST API server");
    println!("Swagger UI: http://{bind_address}/swagger-ui");
    println!("API Base: http://{bind_address}/api/v1");
    println!();
    println!("Example commands:");
    println!("  curl -X POST http://{bind_address}/api/v1/download-tasks \\");
    println!("    -H 'Authorization: Bearer {DEMO_TOKEN}' \\");
    println!("    -H 'Content-Type: application/json' \\");
    println!("    -d '{{\"download_type\": \"http\", \"url\": \"https://example.com/file.iso\"}}'");
    println!();
    println!("  curl -H 'Authorization: Bearer {DEMO_TOKEN}' http://{bind_address}/api/v1/download-tasks");
    println!("  curl -N -H 'Authorization: Bearer {DEMO_TOKEN}' http://{bind_address}/api/v1/events");

    run_with_shutdown(engine).await?;
    api.await??;

    Ok(())
}
