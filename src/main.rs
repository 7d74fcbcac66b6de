//! Tracestore CLI entry point.

use tracestore::cli::{self, Cli};
use tracestore::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
