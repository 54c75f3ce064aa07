use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout is reserved for command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    minibox_cli::run().await
}
