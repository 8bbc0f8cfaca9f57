use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// PowerFolder remote calls.
///
/// Runs two in-process peers and exercises synchronous remote calls between them.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Path to the configuration file. The default is `$HOME/.powerfolder/config.yml`.
    #[arg(long = "config-file", short = 'c')]
    pub config_file: Option<PathBuf>,
    /// Request timeout in seconds. Overrides the value in the configuration file.
    #[arg(long = "timeout", short = 't', env = "POWERFOLDER_REQUEST_TIMEOUT")]
    pub timeout: Option<u64>,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Send a chain of echo requests and check every reply.
    #[command(name = "echo")]
    Echo(EchoCommand),
    /// Call the demo folder service through a typed stub.
    #[command(name = "call")]
    Call(CallCommand),
    /// Write a configuration file holding the default settings.
    #[command(name = "init")]
    Init,
}

#[derive(Debug, Args)]
pub struct EchoCommand {
    /// Number of sequential requests to send.
    #[arg(long = "count", short = 'n', default_value_t = 100)]
    pub count: usize,
    /// The first payload. Every following request appends `---X{i} XXX` to the previous one.
    #[arg(long = "payload", short = 'p', default_value = "Hello!")]
    pub payload: String,
}

#[derive(Debug, Args)]
pub struct CallCommand {
    /// The name to greet.
    #[arg(long = "name")]
    pub name: String,
    /// Also list the files of this folder.
    #[arg(long = "folder")]
    pub folder: Option<String>,
}

pub struct GlobalOptions {
    pub config_file: Option<PathBuf>,
    pub timeout: Option<u64>,
}

impl Config {
    pub fn to_parts(self) -> (GlobalOptions, CliCommand) {
        let global = GlobalOptions { config_file: self.config_file, timeout: self.timeout };
        (global, self.command)
    }
}
