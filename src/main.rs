use anyhow::Result;
use winget_panel::{config, server};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 加载配置
    let config = config::Config::load_or_default()?;
    log::debug!("配置: {:?}", config);

    server::serve(config).await?;

    Ok(())
}
