use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use menu_commerce::commerce::{PgCommerceStore, PlanCatalogGenerator, SystemIdentity};
use menu_commerce::config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

fn actor_from_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Option<String>> {
    let mut actor = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--actor" => {
                actor = Some(args.next().context("--actor requires a value")?);
            }
            other => anyhow::bail!("unknown argument `{other}`; usage: regenerate_catalog [--actor <id>]"),
        }
    }
    Ok(actor)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let actor = actor_from_args(std::env::args().skip(1))?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(config::DATABASE_URL.as_str())
        .await
        .context("connecting to DATABASE_URL")?;
    sqlx::migrate!()
        .run(&pool)
        .await
        .context("running migrations")?;

    let store = Arc::new(PgCommerceStore::new(pool));
    let generator = PlanCatalogGenerator::new(store.clone(), config::PLAN_CURRENCY.as_str());
    let identity = SystemIdentity::new(config::SYSTEM_ACTOR_ID.as_str());

    let summary = generator
        .regenerate(store.as_ref(), &identity, actor.as_deref())
        .await
        .context("regenerating plan catalog")?;

    let incomplete: Vec<_> = summary
        .per_category
        .iter()
        .filter(|count| count.plans != 3)
        .collect();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if !incomplete.is_empty() {
        anyhow::bail!("{} categories did not receive three plans", incomplete.len());
    }
    Ok(())
}
