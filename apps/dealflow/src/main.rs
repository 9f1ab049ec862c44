use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;

use dealflow::api::{RunControl, StartRunRequest};
use dealflow::config::OrchestratorConfig;
use dealflow::domain::clock::SystemClock;
use dealflow::domain::deal::Listing;
use dealflow::domain::repositories::CheckpointStore;
use dealflow::domain::run::{HumanInput, RunContext, WorkflowStatus};
use dealflow::infrastructure::repositories::{InMemoryCheckpointStore, PostgresCheckpointStore};
use dealflow::infrastructure::services::reference_services;
use dealflow::telemetry;

/// Human decisions the demo is willing to make before giving up
const MAX_REVIEWS: usize = 10;

fn demo_listings() -> Vec<Listing> {
    let listing = |id: &str, address: &str, price: i64, estimate: Option<i64>, days: u32| Listing {
        source: "static".to_string(),
        external_id: id.to_string(),
        address: address.to_string(),
        market: "Austin".to_string(),
        listing_price: Decimal::from(price),
        estimated_value: estimate.map(Decimal::from),
        days_on_market: days,
    };
    vec![
        listing("1001", "12 Oak St", 185_000, Some(260_000), 64),
        listing("1002", "48 Maple Ave", 240_000, Some(255_000), 21),
        listing("1003", "7 Cedar Ct", 310_000, None, 9),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables, then initialize tracing
    dotenv::dotenv().ok();
    telemetry::init_tracing();

    let config = OrchestratorConfig::from_env();

    let store: Arc<dyn CheckpointStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let store = PostgresCheckpointStore::new(pool);
            store.ensure_schema().await?;
            tracing::info!("Database connected successfully");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, checkpoints stay in memory");
            Arc::new(InMemoryCheckpointStore::new())
        }
    };

    let control = RunControl::bootstrap(
        config,
        store,
        reference_services(demo_listings()),
        Arc::new(SystemClock),
        None,
    )
    .await?;

    let request = StartRunRequest {
        context: RunContext::new(Decimal::from(500_000)),
        deals: Vec::new(),
    };
    let mut response = control.start(request).await?;

    for _ in 0..MAX_REVIEWS {
        if response.run.status != WorkflowStatus::HumanEscalation {
            break;
        }
        if let Some(escalation) = &response.run.escalation {
            tracing::info!(cause = %escalation.key.cause, detail = %escalation.detail, "Approving escalation");
        }
        response = control
            .resume(response.run.run_id, HumanInput::approve("demo"))
            .await?;
    }

    tracing::info!(
        run_id = %response.run.run_id,
        status = %response.run.status,
        steps = response.run.steps,
        "Run settled"
    );
    for deal in &response.run.deals {
        tracing::info!(address = %deal.address, status = %deal.status, score = deal.score, "Deal");
    }

    control.shutdown().await;
    Ok(())
}
