mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "wirebus", version, about = "Reconnecting RPC over Unix sockets")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_subcommand() {
        let cli = Cli::try_parse_from([
            "wirebus",
            "call",
            "/tmp/test.sock",
            "--service",
            "/services/echo",
            "--method",
            "echo",
            "--params",
            "{\"x\":1}",
        ])
        .expect("call args should parse");

        assert!(matches!(cli.command, Command::Call(_)));
    }

    #[test]
    fn call_requires_a_method() {
        let err = Cli::try_parse_from(["wirebus", "call", "/tmp/test.sock"])
            .expect_err("missing --method should fail");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn parses_ping_subcommand() {
        let cli = Cli::try_parse_from(["wirebus", "ping", "/tmp/test.sock", "--count", "2"])
            .expect("ping args should parse");
        assert!(matches!(cli.command, Command::Ping(_)));
    }

    #[test]
    fn parses_serve_with_heartbeat_interval() {
        let cli = Cli::try_parse_from([
            "wirebus",
            "serve",
            "/tmp/test.sock",
            "--heartbeat-interval",
            "5s",
        ])
        .expect("serve args should parse");
        assert!(matches!(cli.command, Command::Serve(_)));
    }
}
