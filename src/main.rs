#[tokio::main]
async fn main() -> anyhow::Result<()> {
    loopwatch_lib::utils::logging::init();
    let config = loopwatch_lib::config::AppConfig::load()?;
    loopwatch_lib::run(config).await
}
