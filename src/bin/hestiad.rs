//! `hestiad` – Hestia dispatcher daemon speaking NDJSON over stdio or TCP.

use hestia::config::{self, HestiaConfig};
use hestia::dispatcher::Dispatcher;
use hestia::service::Service;
use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    let mut listen_addr: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = match args.next() {
                    Some(path) => path,
                    None => {
                        eprintln!("--config requires a path argument");
                        print_usage();
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "missing value for --config",
                        ));
                    }
                };
                config_path = Some(PathBuf::from(path));
            }
            "--stdio" => {
                // Default transport.
            }
            "--listen" => {
                let addr = match args.next() {
                    Some(addr) => addr,
                    None => {
                        eprintln!("--listen requires an address argument");
                        print_usage();
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "missing value for --listen",
                        ));
                    }
                };
                listen_addr = Some(addr);
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "invalid command-line argument",
                ));
            }
        }
    }

    let mut config = match config_path {
        Some(path) => config::load_config(&path).map_err(to_io_error)?,
        None => HestiaConfig::default(),
    };
    config.apply_env_overrides();

    let dispatcher = Dispatcher::from_config(&config).map_err(to_io_error)?;
    let service = Service::new(Arc::new(dispatcher));

    if let Some(addr) = listen_addr {
        return run_tcp(service, &addr).await;
    }

    run_stdio(service).await
}

async fn run_stdio(service: Service) -> io::Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let writer = BufWriter::new(tokio::io::stdout());
    service.handle(reader, writer).await
}

async fn run_tcp(service: Service, addr: &str) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let actual = listener.local_addr()?;
    tracing::info!(%actual, "hestiad listening");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let service = service.clone();
                tokio::spawn(async move {
                    let (read_half, write_half) = stream.into_split();
                    let reader = BufReader::new(read_half);
                    let writer = BufWriter::new(write_half);
                    if let Err(err) = service.handle(reader, writer).await {
                        tracing::warn!(%peer, error = %err, "connection error");
                    }
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to accept connection");
            }
        }
    }
}

fn print_usage() {
    eprintln!(
        "Usage: hestiad [--config PATH] [--stdio] [--listen ADDR]\n\
         \n\
         Options:\n\
           --config PATH  Configuration file (default: built-in defaults)\n\
           --stdio        Communicate over stdin/stdout (default)\n\
           --listen ADDR  Listen on TCP ADDR instead of stdio\n"
    );
}

fn to_io_error(error: anyhow::Error) -> io::Error {
    io::Error::other(format!("{error:#}"))
}
