//! respwire - A command-line client for Redis-compatible servers
//!
//! Sends one command (or a latency probe) over a respwire connection and
//! prints the reply the way redis-cli does.

use anyhow::Context;
use respwire::{Connection, ConnectionConfig, Endpoint, Timeout, TlsContext, TlsOptions};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Client configuration
struct Config {
    /// Host to connect to
    host: String,
    /// Port to connect to
    port: u16,
    /// Unix socket path; overrides host and port
    socket: Option<PathBuf>,
    /// Whether to negotiate TLS
    tls: bool,
    /// Certificate and key files for TLS
    tls_options: TlsOptions,
    connect_timeout: Timeout,
    read_timeout: Timeout,
    write_timeout: Timeout,
    /// Print the PING round trip instead of running a command
    latency: bool,
    /// The command and its arguments
    command: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: respwire::DEFAULT_HOST.to_string(),
            port: respwire::DEFAULT_PORT,
            socket: None,
            tls: false,
            tls_options: TlsOptions::default(),
            connect_timeout: Timeout::from_micros(1_000_000),
            read_timeout: Timeout::from_micros(1_000_000),
            write_timeout: Timeout::from_micros(1_000_000),
            latency: false,
            command: Vec::new(),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = value_of(&args, i);
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = value_of(&args, i).parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    });
                    i += 2;
                }
                "--socket" | "-s" => {
                    config.socket = Some(PathBuf::from(value_of(&args, i)));
                    i += 2;
                }
                "--tls" => {
                    config.tls = true;
                    i += 1;
                }
                "--cacert" => {
                    config.tls_options.ca_file = Some(PathBuf::from(value_of(&args, i)));
                    i += 2;
                }
                "--capath" => {
                    config.tls_options.ca_path = Some(PathBuf::from(value_of(&args, i)));
                    i += 2;
                }
                "--cert" => {
                    config.tls_options.cert = Some(PathBuf::from(value_of(&args, i)));
                    i += 2;
                }
                "--key" => {
                    config.tls_options.key = Some(PathBuf::from(value_of(&args, i)));
                    i += 2;
                }
                "--sni" => {
                    config.tls_options.hostname = Some(value_of(&args, i));
                    i += 2;
                }
                "--connect-timeout" => {
                    config.connect_timeout = seconds_of(&args, i);
                    i += 2;
                }
                "--read-timeout" => {
                    config.read_timeout = seconds_of(&args, i);
                    i += 2;
                }
                "--write-timeout" => {
                    config.write_timeout = seconds_of(&args, i);
                    i += 2;
                }
                "--latency" => {
                    config.latency = true;
                    i += 1;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("respwire version {}", respwire::VERSION);
                    std::process::exit(0);
                }
                flag if flag.starts_with('-') && config.command.is_empty() => {
                    eprintln!("Unknown argument: {}", flag);
                    print_help();
                    std::process::exit(1);
                }
                _ => {
                    // Everything from the first positional argument on is the command.
                    config.command = args[i..].to_vec();
                    break;
                }
            }
        }

        config
    }

    fn endpoint(&self) -> Endpoint {
        match &self.socket {
            Some(path) => Endpoint::unix(path.clone()),
            None => Endpoint::tcp(self.host.clone(), self.port),
        }
    }

    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::default()
            .with_connect_timeout(self.connect_timeout)
            .with_read_timeout(self.read_timeout)
            .with_write_timeout(self.write_timeout)
    }
}

/// Returns the value following the flag at `args[i]`, or exits.
fn value_of(args: &[String], i: usize) -> String {
    match args.get(i + 1) {
        Some(value) => value.clone(),
        None => {
            eprintln!("Error: {} requires a value", args[i]);
            std::process::exit(1);
        }
    }
}

/// Parses fractional seconds; zero means no timeout.
fn seconds_of(args: &[String], i: usize) -> Timeout {
    match value_of(args, i).parse::<f64>() {
        Ok(secs) if secs >= 0.0 => Timeout::from_secs_f64(secs),
        _ => {
            eprintln!("Error: {} expects a non-negative number of seconds", args[i]);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
respwire - A command-line client for Redis-compatible servers

USAGE:
    respwire [OPTIONS] [COMMAND [ARG ...]]

OPTIONS:
    -h, --host <HOST>              Server host (default: 127.0.0.1)
    -p, --port <PORT>              Server port (default: 6379)
    -s, --socket <PATH>            Unix socket path (overrides host and port)
        --tls                      Connect over TLS
        --cacert <FILE>            CA certificate bundle
        --capath <DIR>             Directory of CA certificates
        --cert <FILE>              Client certificate
        --key <FILE>               Client private key
        --sni <NAME>               Server name to verify (default: host)
        --connect-timeout <SECS>   Connect timeout, 0 for none (default: 1)
        --read-timeout <SECS>      Read timeout, 0 for none (default: 1)
        --write-timeout <SECS>     Write timeout, 0 for none (default: 1)
        --latency                  Print the PING round trip in milliseconds
    -v, --version                  Print version information
        --help                     Print this help message

EXAMPLES:
    respwire PING                          # PONG
    respwire SET name Ariz                 # OK
    respwire -p 6380 GET name              # "Ariz"
    respwire -s /tmp/redis.sock INFO       # Over a Unix socket
    respwire --tls --cacert ca.pem PING    # Over TLS
    respwire --latency                     # 0.112 ms

LOGGING:
    Set RUST_LOG (e.g. RUST_LOG=respwire=debug) for connection logs.
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let endpoint = config.endpoint();
    let tls = if config.tls {
        let context = TlsContext::new(&config.tls_options).context("failed to set up TLS")?;
        Some(context)
    } else {
        None
    };

    let mut conn = Connection::open(endpoint.clone(), tls, config.connection_config())
        .await
        .with_context(|| format!("could not connect to {}", endpoint))?;

    if config.latency {
        let millis = conn.measure_round_trip(None).await?;
        println!("{:.3} ms", millis);
    } else {
        let command = if config.command.is_empty() {
            vec!["PING".to_string()]
        } else {
            config.command.clone()
        };
        let reply = conn.call(command.as_slice()).await?;
        println!("{}", reply);
    }

    conn.close();
    Ok(())
}
