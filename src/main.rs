//! earshot - a real-time conversational-awareness audio pipeline.

use earshot::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // reqwest and tokio-tungstenite both pull in rustls; with more than one
    // crypto backend reachable in the dependency graph they refuse to pick
    // one implicitly, so it's installed once up front.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    // WARN by default; use RUST_LOG=info (or more granular targets) for
    // per-component detail.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    cli::run().await
}
