mod runner;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 初始化日志（这是入口点的职责）
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // 2. 调用库的核心逻辑
    match runner::run(runner::Settings::from_env()).await {
        Ok(reason) => {
            // 3. 由停止原因决定退出码 (AP-DISABLED 使用独立的退出码)
            tracing::warn!(%reason, code = reason.exit_code(), "🛑 Service stopped");
            std::process::exit(reason.exit_code());
        }
        Err(e) => {
            tracing::error!("❌ IoT Wifi failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
