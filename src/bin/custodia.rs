use anyhow::Result;
use custodia::cli;

#[tokio::main]
async fn main() -> Result<()> {
    let action = cli::start()?;
    action.execute().await?;
    Ok(())
}
