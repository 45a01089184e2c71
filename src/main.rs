use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use vndbpool::config::CliConfig;
use vndbpool::{ClientConfig, Dispatcher};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "vndbpool";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let config = match setup().await {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{APP_NAME}: {err}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            error!("{APP_NAME} failed: {err}");
            std::process::ExitCode::FAILURE
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

async fn setup() -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let cli = CliConfig::from_args();
    init_tracing(&cli);

    Ok(cli.client_config().await?)
}

fn init_tracing(cli: &CliConfig) {
    let filter = EnvFilter::try_new(cli.log_level.as_str())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

/// One command per stdin line; each response payload goes to stdout on its
/// own line. Stops on EOF or Ctrl-C.
async fn run(config: ClientConfig) -> vndbpool::Result<()> {
    let dispatcher = Dispatcher::new(config)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("{APP_NAME} ready; reading commands from stdin");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("{APP_NAME} shutting down");
                break;
            }

            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => { error!("stdin error: {e}"); break; }
                };

                let command = line.trim();
                if command.is_empty() {
                    continue;
                }

                match dispatcher.send(command).await {
                    Ok(response) => {
                        let mut out = response.payload().to_vec();
                        out.push(b'\n');
                        if let Err(e) = stdout.write_all(&out).await {
                            error!("stdout error: {e}");
                            break;
                        }
                        let _ = stdout.flush().await;
                    }
                    Err(e) => error!("command failed: {e}"),
                }
            }
        }
    }

    dispatcher.destroy().await
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
