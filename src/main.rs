use booktree_mcp::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    booktree_mcp::logging::init();
    let config = AppConfig::from_env()?;

    booktree_mcp::interface::mcp::run(config).await
}
