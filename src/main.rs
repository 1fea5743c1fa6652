//! dom-bridge CLI
//!
//! Reads one JSON request from stdin, runs it against the DOM engine and
//! writes one JSON response to stdout:
//!
//!   echo '{"html":"<p>hi</p>","script":"return document.body.innerHTML;"}' \
//!     | dom-bridge --engine ./dom-engine/index.js
//!
//! Exit code is 0 when the response has `ok: true`, 1 otherwise. Logs go to
//! stderr, filtered by `DOM_BRIDGE_LOG` (default `warn`).

use clap::error::ErrorKind;
use clap::Parser;
use dom_bridge::{run_stdin, BridgeConfig, BridgeError, Response};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// ES module exporting a jsdom-compatible `JSDOM` constructor.
    #[arg(long, env = "DOM_BRIDGE_ENGINE")]
    engine: Option<PathBuf>,

    /// Abort the run after this many milliseconds.
    #[arg(long, env = "DOM_BRIDGE_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// V8 heap limit in megabytes.
    #[arg(long, env = "DOM_BRIDGE_MAX_HEAP_MB")]
    max_heap_mb: Option<usize>,
}

impl Cli {
    fn into_config(self) -> BridgeConfig {
        BridgeConfig {
            engine_path: self.engine,
            max_heap_size: self.max_heap_mb.map(|mb| mb.saturating_mul(1024 * 1024)),
            timeout_ms: self.timeout_ms,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DOM_BRIDGE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn respond(response: &Response) -> ExitCode {
    if let Err(err) = response.write_to(std::io::stdout().lock()) {
        tracing::error!(error = %err, "failed to write response");
        return ExitCode::FAILURE;
    }
    response.exit_code()
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            // The harness expects JSON even when it invoked us wrongly.
            let usage = BridgeError::Usage(err.render().to_string().trim_end().to_string());
            return respond(&Response::failure(usage.into_error_body()));
        }
    };

    let config = cli.into_config();
    tracing::debug!(?config, "starting");

    let response = run_stdin(&config).await;
    respond(&response)
}
