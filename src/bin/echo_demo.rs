//! # Echo Demo
//!
//! A small client/server walkthrough exercising the framework end to end:
//! an anonymous server registers an echo route and a streaming fibonacci
//! route, a client built from the server's own minted endpoint calls both,
//! and the results are printed to stdout.

use std::sync::Arc;

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser,
};
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

use xpc_rpc::codec::Encoder;
use xpc_rpc::error::CodecError;
use xpc_rpc::logging::ColorizedFormatter;
use xpc_rpc::server::ServerBuilder;
use xpc_rpc::transport::uds::UdsTransport;
use xpc_rpc::{Acceptor, ClientBuilder, Encodable};

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Demo client/server exercising xpc-rpc's echo and streaming routes", long_about = None, styles = styles())]
struct Args {
    /// Suppress the colorized stdout summary; detailed logs are unaffected.
    #[arg(short, long)]
    quiet: bool,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Message round-tripped through the echo route.
    #[arg(short, long, default_value = "héllo 🌀")]
    message: String,

    /// Number of fibonacci terms streamed back by the sequential-reply route.
    #[arg(short, long, default_value_t = 7)]
    fibonacci: u64,

    /// Write detailed logs to this file (daily-rotated) instead of stderr.
    #[arg(long)]
    log_file: Option<String>,
}

/// The error type the echo route declares. The handler never actually
/// throws; this exists so the route can be fully typed like a real one.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
#[error("{0}")]
struct EchoError(String);

impl Encodable for EchoError {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        encoder.encode_str(&self.0)
    }
}

impl xpc_rpc::codec::Decodable for EchoError {
    fn decode(decoder: &mut dyn xpc_rpc::codec::Decoder) -> Result<Self, CodecError> {
        Ok(Self(decoder.decode_str()?))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // The guard must be kept alive for the duration of the program for file logging.
    let guard;
    let detailed_log_layer;

    match args.log_file.as_deref() {
        None => {
            detailed_log_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(log_level)
                .boxed();
            guard = None;
        }
        Some(path_str) => {
            let log_path = std::path::Path::new(path_str);
            let log_dir = log_path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let log_filename = log_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("echo_demo.log"));
            let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
            let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
            detailed_log_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking_writer)
                .with_ansi(false)
                .with_filter(log_level)
                .boxed();
            guard = Some(file_guard);
        }
    }

    let stdout_log = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(stdout_log)
        .init();

    // Keep the logging guard alive for the duration of the program.
    let _log_guard = guard;

    info!("starting echo demo");

    let transport = Arc::new(UdsTransport);

    let server = ServerBuilder::anonymous(transport.clone())
        .with_acceptor(Acceptor::Always)
        .build()
        .await?;

    server.set_error_handler(|err| {
        error!(error = %err, "server observed an error");
    });

    server.register_message_one_reply(
        xpc_rpc::route::named(["echo"])
            .with_message_type::<String>()
            .with_reply_type::<String>()
            .throws_type::<EchoError>(),
        |message: String| async move { Ok::<String, EchoError>(message) },
    )?;

    server.register_message_sequential_reply(
        xpc_rpc::route::named(["fibonacci"])
            .with_message_type::<u64>()
            .with_sequential_reply_type::<u64>(),
        |count: u64, provider| async move {
            let (mut a, mut b) = (0u64, 1u64);
            for _ in 0..count {
                if provider.success(a).await.is_err() {
                    return;
                }
                let next = a + b;
                a = b;
                b = next;
            }
            provider.finished().await;
        },
    )?;

    server.start()?;

    let client = ClientBuilder::from_endpoint(transport.clone(), server.endpoint()).build();

    let reply: String = client
        .send_message_one_reply(
            xpc_rpc::route::named(["echo"])
                .with_message_type::<String>()
                .with_reply_type::<String>()
                .throws_type::<EchoError>(),
            args.message.clone(),
        )
        .await?;
    info!(sent = %args.message, received = %reply, "echo round trip complete");
    println!("echo({:?}) -> {:?}", args.message, reply);

    let mut stream = client
        .send_message_sequential_reply(
            xpc_rpc::route::named(["fibonacci"])
                .with_message_type::<u64>()
                .with_sequential_reply_type::<u64>(),
            args.fibonacci,
        )
        .await?;

    let mut terms = Vec::new();
    while let Some(next) = stream.next().await {
        match next {
            Ok(value) => terms.push(value),
            Err(err) => {
                error!(error = %err, "fibonacci stream failed");
                break;
            }
        }
    }
    info!(count = terms.len(), "fibonacci stream finished");
    println!("fibonacci({}) -> {:?}", args.fibonacci, terms);

    server.cancel();
    Ok(())
}
