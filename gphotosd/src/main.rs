use gphotosd::config::MirrorConfig;
use gphotosd::mirror::{self, MirrorRuntime};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "gphotosd=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Truncate,
    Status,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--truncate" => mode = CliMode::Truncate,
            "--status" => mode = CliMode::Status,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: gphotosd [--truncate | --status]");
        println!("  --truncate   Remove every catalog entry and reset the sync cursor");
        println!("  --status     Print catalog counts and exit");
        return Ok(());
    }

    init_logging();
    let config = MirrorConfig::from_env()?;
    match mode {
        CliMode::Truncate => mirror::truncate(&config).await,
        CliMode::Status => {
            let counts = mirror::status(&config).await?;
            println!(
                "{} items, {} downloaded, {} pending, {} with errors",
                counts.total,
                counts.downloaded,
                counts.total - counts.downloaded,
                counts.errored
            );
            Ok(())
        }
        CliMode::Run => {
            let runtime = MirrorRuntime::bootstrap(config).await?;
            runtime.run().await.map(|_| ())
        }
        CliMode::Help => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("gphotosd")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parse_cli_mode_defaults_to_run() {
        assert_eq!(parse_cli_mode(args(&[])).unwrap(), CliMode::Run);
    }

    #[test]
    fn parse_cli_mode_supports_truncate_and_status() {
        assert_eq!(
            parse_cli_mode(args(&["--truncate"])).unwrap(),
            CliMode::Truncate
        );
        assert_eq!(parse_cli_mode(args(&["--status"])).unwrap(), CliMode::Status);
    }

    #[test]
    fn parse_cli_mode_supports_help() {
        assert_eq!(parse_cli_mode(args(&["-h"])).unwrap(), CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_arguments() {
        assert!(parse_cli_mode(args(&["--resync"])).is_err());
    }
}
