//! # CLI
//!
//! The command-line surface of `grpcat`, defined with `clap`.
//!
//! The positional grammar follows `[address] (list [service] | describe
//! [symbol] | <symbol>)`: with reflection (the default schema source) the
//! first positional argument is always the server address; with `--protoset`
//! or `--proto` the address is only needed when actually invoking a method.
use grpcat_core::transcode::Format;
use std::collections::VecDeque;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "grpcat",
    version,
    about = "Like curl, but for gRPC: invoke methods and inspect schemas on arbitrary servers",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Encoded FileDescriptorSet file to use as the schema source (repeatable)
    #[arg(long, value_name = "FILE", conflicts_with_all = ["proto", "import_path"])]
    pub protoset: Vec<PathBuf>,

    /// Proto source file to use as the schema source (repeatable)
    #[arg(long, value_name = "FILE")]
    pub proto: Vec<PathBuf>,

    /// Directory to resolve proto imports against (repeatable)
    #[arg(long, value_name = "DIR")]
    pub import_path: Vec<PathBuf>,

    /// Use plain-text HTTP/2 (no TLS)
    #[arg(long)]
    pub plaintext: bool,

    /// Skip server certificate verification (best effort; prefer --cacert)
    #[arg(long)]
    pub insecure: bool,

    /// PEM file with the CA certificate to verify the server against
    #[arg(long, value_name = "FILE")]
    pub cacert: Option<PathBuf>,

    /// PEM file with the client certificate for mutual TLS
    #[arg(long, value_name = "FILE", requires = "key")]
    pub cert: Option<PathBuf>,

    /// PEM file with the client private key for mutual TLS
    #[arg(long, value_name = "FILE", requires = "cert")]
    pub key: Option<PathBuf>,

    /// Override the server name used for TLS verification
    #[arg(long, value_name = "NAME")]
    pub servername: Option<String>,

    /// Override the :authority pseudo-header
    #[arg(long, value_name = "AUTHORITY")]
    pub authority: Option<String>,

    /// Treat the address as the path to a unix domain socket
    #[cfg(unix)]
    #[arg(long)]
    pub unix: bool,

    /// Request data, or '@' to read it from stdin
    #[arg(short = 'd', long = "data", value_name = "DATA")]
    pub data: Option<String>,

    /// Request/response format
    #[arg(long, default_value = "json", value_name = "json|text")]
    pub format: Format,

    /// Emit default-valued fields in JSON responses
    #[arg(long)]
    pub emit_defaults: bool,

    /// Accept unknown fields in JSON request data
    #[arg(long)]
    pub allow_unknown_fields: bool,

    /// With describe: also print a JSON template of the message
    #[arg(long)]
    pub msg_template: bool,

    /// Header sent on both the RPC and reflection requests (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
    pub headers: Vec<String>,

    /// Header sent only on the RPC request (repeatable)
    #[arg(long = "rpc-header", value_name = "NAME: VALUE")]
    pub rpc_headers: Vec<String>,

    /// Header sent only on reflection requests (repeatable)
    #[arg(long = "reflect-header", value_name = "NAME: VALUE")]
    pub reflect_headers: Vec<String>,

    /// Expand ${NAME} in header values from the environment
    #[arg(long)]
    pub expand_headers: bool,

    /// Seconds to wait for the connection to be established
    #[arg(long, value_name = "SECONDS")]
    pub connect_timeout: Option<f64>,

    /// Seconds between HTTP/2 keepalive pings
    #[arg(long, value_name = "SECONDS")]
    pub keepalive_time: Option<f64>,

    /// Deadline for the whole call, in seconds
    #[arg(long, value_name = "SECONDS")]
    pub max_time: Option<f64>,

    /// Write a FileDescriptorSet covering the used symbols to this file
    #[arg(long, value_name = "FILE")]
    pub protoset_out: Option<PathBuf>,

    /// Write .proto sources covering the used symbols under this directory
    #[arg(long, value_name = "DIR")]
    pub proto_out_dir: Option<PathBuf>,

    /// Log every invocation event, not just responses
    #[arg(short, long)]
    pub verbose: bool,

    /// [address] (list [service] | describe [symbol] | <symbol>)
    #[arg(value_name = "ARGS")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    List { service: Option<String> },
    Describe { symbol: Option<String> },
    Invoke { symbol: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub address: Option<String>,
    pub verb: Verb,
}

impl Cli {
    pub fn uses_reflection(&self) -> bool {
        self.protoset.is_empty() && self.proto.is_empty()
    }

    /// Interprets the positional arguments.
    pub fn target(&self) -> Result<Target, String> {
        let mut args: VecDeque<&str> = self.args.iter().map(String::as_str).collect();

        // The first argument is the address unless it already is a verb.
        // With a file-based schema source a lone argument is the verb or
        // symbol, never an address.
        let first_is_verb = matches!(args.front(), Some(&"list") | Some(&"describe"));
        let address = if !first_is_verb
            && !args.is_empty()
            && (self.uses_reflection() || args.len() > 1)
        {
            args.pop_front().map(str::to_string)
        } else {
            None
        };
        if self.uses_reflection() && address.is_none() {
            return Err("too few arguments: an address is required".into());
        }

        let verb = match args.pop_front() {
            None => return Err("too few arguments: expected 'list', 'describe' or a method".into()),
            Some("list") => Verb::List {
                service: args.pop_front().map(str::to_string),
            },
            Some("describe") => Verb::Describe {
                symbol: args.pop_front().map(str::to_string),
            },
            Some(symbol) => Verb::Invoke {
                symbol: symbol.to_string(),
            },
        };

        if let Some(extra) = args.pop_front() {
            return Err(format!("too many arguments: unexpected '{extra}'"));
        }
        if matches!(verb, Verb::Invoke { .. }) && address.is_none() {
            return Err("an address is required to invoke a method".into());
        }

        Ok(Target { address, verb })
    }
}
