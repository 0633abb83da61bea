#![forbid(unsafe_code)]

mod values;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

use ndcall_core::{Callable, DST_TP, Kwds, KwdValue, NdcallConfig, Type, registry};

use values::{ArrayReport, parse_arg, parse_kwd};

/// Environment variable holding a `tracing` filter, e.g. `ndcall_core=trace`.
const LOG_ENV: &str = "NDCALL_LOG";

#[derive(Parser, Debug)]
#[command(name = "ndcall", version, about = "Resolve and call registered array callables")]
struct Cli {
    /// Configuration file. Defaults to `$NDCALL_CONFIG`, then built-in settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (repeatable). `NDCALL_LOG` overrides this.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List registered callables and their signatures
    List,

    /// Print the result type of a callable for concrete argument types
    Resolve {
        /// Registered callable name
        name: String,

        /// Argument types, e.g. `3 * int32`
        types: Vec<String>,

        /// Destination type override
        #[arg(long)]
        dst_tp: Option<String>,

        /// Extra keyword argument as `NAME=VALUE` (repeatable)
        #[arg(long = "kwd", value_name = "NAME=VALUE")]
        kwds: Vec<String>,
    },

    /// Call a callable on JSON data and print the result as JSON
    Call {
        /// Registered callable name
        name: String,

        /// Positional argument as `TYPE=JSON`, e.g. `3 * int32=[1,2,3]` (repeatable)
        #[arg(long = "arg", value_name = "TYPE=JSON")]
        args: Vec<String>,

        /// Destination type override
        #[arg(long)]
        dst_tp: Option<String>,

        /// Extra keyword argument as `NAME=VALUE` (repeatable)
        #[arg(long = "kwd", value_name = "NAME=VALUE")]
        kwds: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
struct CallReport {
    callable: String,
    result: ArrayReport,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> miette::Result<NdcallConfig> {
    match path {
        Some(p) => NdcallConfig::from_file(p),
        None => NdcallConfig::from_env(),
    }
}

fn lookup(name: &str) -> miette::Result<Callable> {
    registry::get(name)
        .ok_or_else(|| miette::miette!("no callable named `{name}`; see `ndcall list`"))
}

fn build_kwds(dst_tp: Option<&str>, raw: &[String]) -> miette::Result<Kwds> {
    let mut kwds = Kwds::new();
    for k in raw {
        let (name, value) = parse_kwd(k)?;
        kwds.insert(name, value);
    }
    if let Some(t) = dst_tp {
        let ty: Type = t.parse().map_err(miette::Report::new)?;
        kwds.insert(DST_TP, KwdValue::Type(ty));
    }
    Ok(kwds)
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_ref())?;
    debug!(?config, "configuration loaded");
    registry::init_with(config).map_err(miette::Report::new)?;

    match cli.cmd {
        Cmd::List => {
            for name in registry::names() {
                if let Some(callable) = registry::get(&name) {
                    println!("{name:<10} {}", callable.signature());
                }
            }
            Ok(())
        }
        Cmd::Resolve {
            name,
            types,
            dst_tp,
            kwds,
        } => {
            let callable = lookup(&name)?;
            let types = types
                .iter()
                .map(|t| t.parse::<Type>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(miette::Report::new)?;
            let kwds = build_kwds(dst_tp.as_deref(), &kwds)?;
            let ret = callable
                .resolve(None, &types, &kwds)
                .map_err(miette::Report::new)?;
            println!("{ret}");
            Ok(())
        }
        Cmd::Call {
            name,
            args,
            dst_tp,
            kwds,
        } => {
            let callable = lookup(&name)?;
            let args = args
                .iter()
                .map(|a| parse_arg(a))
                .collect::<Result<Vec<_>, _>>()?;
            let kwds = build_kwds(dst_tp.as_deref(), &kwds)?;
            let out = callable.call(&args, kwds).map_err(miette::Report::new)?;
            let report = CallReport {
                callable: name,
                result: ArrayReport::new(&out)?,
            };
            let json = serde_json::to_string_pretty(&report).into_diagnostic()?;
            println!("{json}");
            Ok(())
        }
    }
}
