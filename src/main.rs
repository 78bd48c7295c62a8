mod args;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, Commands, InitArgs, ScalarCommand};
use stockroom::codec::Scalar;
use stockroom::session::{find_stock_root, SessionRegistry};
use stockroom::stock::{InitOptions, StockRoom};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let cwd = match cli.path {
        Some(path) => path,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let registry = SessionRegistry::new();

    match cli.command {
        Commands::Init(args) => init(&cwd, args, &registry),
        Commands::Commit(args) => {
            let stock = open(&cwd, &registry)?;
            let digest = stock.commit(&args.message)?;
            println!("{}", digest);
            Ok(())
        }
        Commands::Liberate => {
            let stock = open(&cwd, &registry)?;
            if stock.liberate()? {
                println!("writer lock released");
            } else {
                println!("no writer lock was held");
            }
            Ok(())
        }
        Commands::Log(args) => {
            let stock = open(&cwd, &registry)?;
            let log = stock.log()?;
            for info in log.iter().take(args.limit.unwrap_or(usize::MAX)) {
                println!(
                    "{} {} {}",
                    info.digest.short(),
                    info.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    info.summary()
                );
            }
            Ok(())
        }
        Commands::Head => {
            let stock = open(&cwd, &registry)?;
            match stock.head()? {
                Some(digest) => println!("{}", digest),
                None => println!("(no commits)"),
            }
            Ok(())
        }
        Commands::Tag(command) => {
            let stock = open(&cwd, &registry)?;
            let tags = stock.tag();
            scalar(command, |n| tags.get(n), |n, v| tags.set(n, v), || tags.keys())
        }
        Commands::Param(command) => {
            let stock = open(&cwd, &registry)?;
            let params = stock.param();
            scalar(command, |n| params.get(n), |n, v| params.set(n, v), || params.keys())
        }
    }
}

fn init(root: &Path, args: InitArgs, registry: &SessionRegistry) -> Result<()> {
    let mut options = InitOptions::new().overwrite(args.overwrite);
    match (args.name, args.email) {
        (Some(name), Some(email)) => options = options.signature(name, email),
        (None, None) => {}
        _ => bail!("--name and --email must be given together"),
    }

    let stock = StockRoom::init(root, options, registry)
        .with_context(|| format!("failed to initialize stock at {}", root.display()))?;
    println!("initialized stock at {}", stock.root().display());
    Ok(())
}

fn open(start: &Path, registry: &SessionRegistry) -> Result<StockRoom> {
    let root: PathBuf = find_stock_root(start)
        .with_context(|| {
            format!("no stock found at or above {}; run `stock init`", start.display())
        })?;
    Ok(StockRoom::open(&root, registry)?)
}

fn scalar<E>(
    command: ScalarCommand,
    get: impl Fn(&str) -> Result<Scalar, E>,
    set: impl Fn(&str, Scalar) -> Result<(), E>,
    keys: impl Fn() -> Result<Vec<String>, E>,
) -> Result<()>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match command {
        ScalarCommand::Get { name } => println!("{}", get(&name)?),
        ScalarCommand::Set { name, value } => {
            set(&name, Scalar::infer(&value))?;
            println!("staged {}; run `stock commit` to record it", name);
        }
        ScalarCommand::List => {
            for name in keys()? {
                println!("{}", name);
            }
        }
    }
    Ok(())
}
