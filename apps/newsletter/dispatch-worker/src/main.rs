//! Newsletter Dispatch Worker - Entry Point
//!
//! Background worker that emails subscribers when content is published.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    newsletter_dispatch_worker::run().await
}
