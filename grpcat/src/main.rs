//! # Grpcat CLI Entry Point
//!
//! The main executable drives the application lifecycle:
//!
//! 1. **Initialization**: parses command-line arguments using [`cli::Cli`].
//! 2. **Schema source**: builds a descriptor source from protoset files,
//!    proto sources, or the server's reflection service.
//! 3. **Execution**: dispatches `list`, `describe`, or a method invocation
//!    through `grpcat_core`.
//! 4. **Presentation**: prints results to standard output and errors to
//!    standard error; exits 0 on success, 1 on RPC or schema failures, 2 on
//!    usage errors.

mod cli;
mod formatter;

use anyhow::Context as _;
use clap::Parser;
use cli::{Cli, Target, Verb};
use colored::Colorize as _;
use grpcat_core::descriptor::export::{write_proto_files, write_protoset};
use grpcat_core::descriptor::source::{DescriptorSource, FileSource, ServerSource, Symbol};
use grpcat_core::invoke::{DefaultEventHandler, invoke_rpc};
use grpcat_core::metadata::{expand_headers, metadata_from_headers};
use grpcat_core::tonic::Code;
use grpcat_core::tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use grpcat_core::transcode::{TranscodeOptions, request_parser_and_formatter, template};
use std::collections::HashMap;
use std::io;
use std::process;
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Cli::parse();
    let target = match args.target() {
        Ok(target) => target,
        Err(message) => {
            eprintln!("{} {message}", "Usage error:".red().bold());
            process::exit(2);
        }
    };

    match run(args, target).await {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{} {err:#}", "Error:".red().bold());
            process::exit(1);
        }
    }
}

async fn run(args: Cli, target: Target) -> anyhow::Result<i32> {
    let environment: HashMap<String, String> = std::env::vars().collect();
    let expand = |headers: &[String]| -> anyhow::Result<Vec<String>> {
        if args.expand_headers {
            Ok(expand_headers(headers, &environment)?)
        } else {
            Ok(headers.to_vec())
        }
    };
    let mut reflect_headers = args.headers.clone();
    reflect_headers.extend(args.reflect_headers.iter().cloned());
    let reflect_headers = expand(&reflect_headers)?;
    let mut rpc_headers = args.headers.clone();
    rpc_headers.extend(args.rpc_headers.iter().cloned());
    let rpc_headers = expand(&rpc_headers)?;

    let needs_channel = args.uses_reflection() || matches!(target.verb, Verb::Invoke { .. });
    let channel = match (&target.address, needs_channel) {
        (Some(address), true) => Some(dial(&args, address).await?),
        _ => None,
    };

    let source: Box<dyn DescriptorSource> = if !args.protoset.is_empty() {
        Box::new(FileSource::from_protoset_files(&args.protoset)?)
    } else if !args.proto.is_empty() {
        Box::new(FileSource::from_proto_files(&args.import_path, &args.proto)?)
    } else {
        let channel = channel.clone().context("reflection requires a server address")?;
        let metadata = metadata_from_headers(&reflect_headers)?;
        Box::new(ServerSource::new(channel).with_headers(metadata))
    };

    let exit_code = match &target.verb {
        Verb::List { service: None } => {
            let mut services = source.list_services().await?;
            services.sort();
            for service in services {
                println!("{service}");
            }
            0
        }
        Verb::List {
            service: Some(service),
        } => {
            let symbol = source.find_symbol(service.trim_start_matches('.')).await?;
            let Symbol::Service(descriptor) = symbol else {
                anyhow::bail!("'{service}' is not a service");
            };
            for method in descriptor.methods() {
                println!("{}.{}", descriptor.full_name(), method.name());
            }
            0
        }
        Verb::Describe { symbol } => {
            describe(&args, source.as_ref(), symbol.as_deref()).await?;
            0
        }
        Verb::Invoke { symbol } => {
            let channel = channel.clone().context("an address is required")?;
            invoke(&args, source.as_ref(), channel, symbol, &rpc_headers).await?
        }
    };

    if args.protoset_out.is_some() || args.proto_out_dir.is_some() {
        let symbols = export_symbols(&target, source.as_ref()).await?;
        if let Some(path) = &args.protoset_out {
            let mut file = std::fs::File::create(path)
                .with_context(|| format!("failed to create '{}'", path.display()))?;
            write_protoset(&mut file, source.as_ref(), &symbols).await?;
        }
        if let Some(dir) = &args.proto_out_dir {
            write_proto_files(dir, source.as_ref(), &symbols).await?;
        }
    }

    Ok(exit_code)
}

async fn dial(args: &Cli, address: &str) -> anyhow::Result<Channel> {
    #[cfg(unix)]
    if args.unix {
        let path = address.to_string();
        let channel = Endpoint::from_static("http://localhost")
            .connect_with_connector(tower::service_fn(
                move |_: grpcat_core::tonic::transport::Uri| {
                    let path = path.clone();
                    async move {
                        let stream = tokio::net::UnixStream::connect(path).await?;
                        Ok::<_, io::Error>(hyper_util::rt::TokioIo::new(stream))
                    }
                },
            ))
            .await
            .with_context(|| format!("failed to connect to unix socket '{address}'"))?;
        return Ok(channel);
    }

    let uri = if address.contains("://") {
        address.to_string()
    } else if args.plaintext {
        format!("http://{address}")
    } else {
        format!("https://{address}")
    };

    let mut endpoint = Endpoint::from_shared(uri.clone())
        .with_context(|| format!("invalid address '{address}'"))?;
    if let Some(seconds) = args.connect_timeout {
        endpoint = endpoint.connect_timeout(duration_flag(seconds, "--connect-timeout")?);
    }
    if let Some(seconds) = args.keepalive_time {
        endpoint = endpoint.http2_keep_alive_interval(duration_flag(seconds, "--keepalive-time")?);
    }
    if let Some(authority) = &args.authority {
        endpoint = endpoint.origin(
            authority
                .parse()
                .with_context(|| format!("invalid authority '{authority}'"))?,
        );
    }

    if !args.plaintext {
        let mut tls = ClientTlsConfig::new().with_native_roots();
        if let Some(path) = &args.cacert {
            let pem = std::fs::read(path)
                .with_context(|| format!("failed to read CA certificate '{}'", path.display()))?;
            tls = tls.ca_certificate(Certificate::from_pem(pem));
        }
        if let (Some(cert), Some(key)) = (&args.cert, &args.key) {
            let cert_pem = std::fs::read(cert)
                .with_context(|| format!("failed to read client cert '{}'", cert.display()))?;
            let key_pem = std::fs::read(key)
                .with_context(|| format!("failed to read client key '{}'", key.display()))?;
            tls = tls.identity(Identity::from_pem(cert_pem, key_pem));
        }
        if let Some(name) = &args.servername {
            tls = tls.domain_name(name);
        }
        if args.insecure {
            eprintln!(
                "{} certificate verification cannot be disabled; pass the server's CA via --cacert instead",
                "Warning:".yellow().bold()
            );
        }
        endpoint = endpoint.tls_config(tls)?;
    }

    endpoint
        .connect()
        .await
        .with_context(|| format!("failed to connect to '{uri}'"))
}

fn duration_flag(seconds: f64, flag: &str) -> anyhow::Result<Duration> {
    if !seconds.is_finite() || seconds < 0.0 {
        anyhow::bail!("{flag} must be a non-negative number of seconds");
    }
    Ok(Duration::from_secs_f64(seconds))
}

async fn describe(
    args: &Cli,
    source: &dyn DescriptorSource,
    symbol: Option<&str>,
) -> anyhow::Result<()> {
    let symbols = match symbol {
        Some(symbol) => vec![symbol.trim_start_matches('.').to_string()],
        None => {
            let mut services = source.list_services().await?;
            services.sort();
            services
        }
    };

    for name in symbols {
        let symbol = source.find_symbol(&name).await?;
        println!(
            "{} is {} {}:",
            symbol.full_name(),
            formatter::article(symbol.kind()),
            symbol.kind()
        );
        println!("{}", formatter::describe_symbol(&symbol));

        if args.msg_template
            && let Symbol::Message(descriptor) = &symbol
        {
            println!("\nMessage template:");
            println!(
                "{}",
                serde_json::to_string_pretty(&template::message_template(descriptor))?
            );
        }
        println!();
    }
    Ok(())
}

async fn invoke(
    args: &Cli,
    source: &dyn DescriptorSource,
    channel: Channel,
    symbol: &str,
    rpc_headers: &[String],
) -> anyhow::Result<i32> {
    let input: Box<dyn io::Read + Send> = match &args.data {
        Some(data) if data == "@" => Box::new(io::stdin()),
        Some(data) => Box::new(io::Cursor::new(data.clone().into_bytes())),
        None => Box::new(io::empty()),
    };
    let options = TranscodeOptions {
        emit_defaults: args.emit_defaults,
        allow_unknown_fields: args.allow_unknown_fields,
        include_text_separator: true,
    };
    let (parser, response_formatter) = request_parser_and_formatter(args.format, options, input);
    let deadline = match args.max_time {
        Some(seconds) => Some(duration_flag(seconds, "--max-time")?),
        None => None,
    };

    let mut out = io::stdout();
    let mut handler = DefaultEventHandler::new(&mut out, response_formatter, args.verbose);
    invoke_rpc(
        source,
        channel,
        symbol,
        rpc_headers,
        deadline,
        &mut handler,
        parser,
    )
    .await?;

    let status = handler.status.take().context("call ended without a status")?;
    if status.code() == Code::Ok {
        Ok(0)
    } else {
        eprintln!("{}", formatter::format_status(&status));
        Ok(1)
    }
}

/// The symbols a schema export should cover for the given verb.
async fn export_symbols(
    target: &Target,
    source: &dyn DescriptorSource,
) -> anyhow::Result<Vec<String>> {
    match &target.verb {
        Verb::List { service: None } | Verb::Describe { symbol: None } => {
            let mut services = source.list_services().await?;
            services.sort();
            Ok(services)
        }
        Verb::List {
            service: Some(symbol),
        }
        | Verb::Describe {
            symbol: Some(symbol),
        } => Ok(vec![symbol.trim_start_matches('.').to_string()]),
        Verb::Invoke { symbol } => {
            Ok(vec![symbol.trim_start_matches('.').replace('/', ".")])
        }
    }
}
