use anyhow::{anyhow, Context};
use todo_web::config::AppConfig;

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real environment variables still apply.
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;
    todo_web::rocket_instance(config)
        .launch()
        .await
        .map_err(|err| anyhow!("Rocket server failed to launch: {err}"))?;
    Ok(())
}
