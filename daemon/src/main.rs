mod app;
mod config;
mod publish;
mod startup;
mod state;

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

#[derive(Debug, Default, PartialEq, Eq)]
struct CliOptions {
    config: Option<PathBuf>,
    show_help: bool,
}

fn parse_args<I>(args: I) -> Result<CliOptions, String>
where
    I: IntoIterator<Item = OsString>,
{
    let mut iter = args.into_iter();
    let _argv0 = iter.next();
    let mut options = CliOptions::default();

    while let Some(argument) = iter.next() {
        match argument.to_string_lossy().as_ref() {
            "-h" | "--help" => options.show_help = true,
            "-c" | "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| String::from("missing path for `--config`"))?;
                options.config = Some(PathBuf::from(path));
            }
            other => return Err(format!("unknown argument `{other}`")),
        }
    }

    Ok(options)
}

fn write_usage<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "Usage: cfamd [--config <path>]")?;
    writeln!(out)?;
    writeln!(out, "Writes this BMC's status into its CFAM-S scratchpad registers")?;
    writeln!(out, "and reads the sibling BMC's.")?;
    writeln!(out)?;
    writeln!(out, "  -c, --config <path>  JSON config file")?;
    writeln!(out, "  -h, --help           Show this help")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let options = match parse_args(std::env::args_os()) {
        Ok(options) => options,
        Err(message) => {
            let mut stderr = io::stderr();
            let _ = writeln!(stderr, "error: {message}");
            let _ = write_usage(&mut stderr);
            return ExitCode::from(2);
        }
    };

    if options.show_help {
        let _ = write_usage(&mut io::stdout());
        return ExitCode::SUCCESS;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match DaemonConfig::load(options.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(err = %e, "unable to load config");
            return ExitCode::FAILURE;
        }
    };

    match app::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(err = %e, "cfamd failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        std::iter::once("cfamd").chain(list.iter().copied()).map(OsString::from).collect()
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args(args(&[])).unwrap(), CliOptions::default());

        let options = parse_args(args(&["--config", "/etc/cfamd.json"])).unwrap();
        assert_eq!(options.config, Some(PathBuf::from("/etc/cfamd.json")));

        assert!(parse_args(args(&["-h"])).unwrap().show_help);
        assert!(parse_args(args(&["--config"])).is_err());
        assert!(parse_args(args(&["-x"])).is_err());
    }
}
