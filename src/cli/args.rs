use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "sandboxctl")]
#[clap(version, about = "Drive a remote sandbox: run commands, manage processes and files")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "SANDBOXCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Sandbox API base address (including the API prefix)
    #[clap(long, global = true, env = "SANDBOXCTL_URL", conflicts_with = "domain")]
    pub url: Option<String>,

    /// Sandbox domain name
    #[clap(long, global = true, env = "SANDBOXCTL_DOMAIN")]
    pub domain: Option<String>,

    /// Bearer token for the sandbox
    #[clap(long, global = true, env = "SANDBOXCTL_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a shell command in the sandbox
    Exec(ExecArgs),

    /// Start a background process
    Start(StartArgs),

    /// List background processes
    Ps,

    /// Kill a background process
    Kill(KillArgs),

    /// Show logs of a background process
    Logs(LogsArgs),

    /// Filesystem operations
    Fs(FsArgs),

    /// Expose a TCP port through the sandbox proxy
    Port(PortArgs),

    /// Check sandbox health
    Health,

    /// Manage configuration
    Config(ConfigArgs),
}

// ============================================================================
// Execution Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Command to execute
    pub command: String,

    /// Working directory inside sandbox
    #[clap(long)]
    pub cwd: Option<String>,

    /// Environment variables to set (KEY=VALUE)
    #[clap(long = "env", short = 'e', value_parser = parse_env_var)]
    pub env_vars: Vec<(String, String)>,

    /// Command timeout in seconds
    #[clap(long)]
    pub timeout: Option<u64>,

    /// Stream output as it is produced
    #[clap(long, short = 's')]
    pub stream: bool,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Command to start
    pub command: String,

    /// Working directory inside sandbox
    #[clap(long)]
    pub cwd: Option<String>,

    /// Environment variables to set (KEY=VALUE)
    #[clap(long = "env", short = 'e', value_parser = parse_env_var)]
    pub env_vars: Vec<(String, String)>,
}

#[derive(Args, Debug)]
pub struct KillArgs {
    /// Process ID (as reported by `ps`)
    pub id: String,

    /// Signal name (e.g. SIGKILL); the sandbox default if omitted
    #[clap(long)]
    pub signal: Option<String>,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Process ID (as reported by `ps`)
    pub id: String,

    /// Keep streaming new output
    #[clap(long, short = 'f')]
    pub follow: bool,
}

// ============================================================================
// Filesystem Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct FsArgs {
    #[clap(subcommand)]
    pub action: FsAction,
}

#[derive(Subcommand, Debug)]
pub enum FsAction {
    /// List a directory
    Ls { path: String },
    /// Show metadata for a path
    Stat { path: String },
    /// Print a file
    Cat { path: String },
    /// Upload a local file
    Put { local: PathBuf, remote: String },
    /// Download a file (to stdout if no local path)
    Get {
        remote: String,
        local: Option<PathBuf>,
    },
    /// Delete a file
    Rm { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Delete a directory
    Rmdir { path: String },
}

// ============================================================================
// Port Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct PortArgs {
    #[clap(subcommand)]
    pub action: PortAction,
}

#[derive(Subcommand, Debug)]
pub enum PortAction {
    /// Bind a port
    Bind { port: u16 },
    /// Release the bound port
    Unbind,
    /// Show the bound port
    Status,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[clap(short, long)]
        force: bool,
    },
}

// ============================================================================
// Common Types
// ============================================================================

fn parse_env_var(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| "Environment variable format: KEY=VALUE".to_string())
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_var() {
        assert_eq!(
            parse_env_var("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert!(parse_env_var("novalue").is_err());
    }

    #[test]
    fn test_cli_parses_exec() {
        let cli = Cli::try_parse_from([
            "sandboxctl",
            "--domain",
            "box.example.com",
            "exec",
            "--stream",
            "-e",
            "A=1",
            "make test",
        ])
        .unwrap();
        match cli.command {
            Commands::Exec(args) => {
                assert!(args.stream);
                assert_eq!(args.command, "make test");
                assert_eq!(args.env_vars, vec![("A".to_string(), "1".to_string())]);
            }
            other => panic!("Expected exec, got {:?}", other),
        }
    }

    #[test]
    fn test_url_conflicts_with_domain() {
        let result = Cli::try_parse_from([
            "sandboxctl",
            "--url",
            "http://h/_sandbox",
            "--domain",
            "d",
            "health",
        ]);
        assert!(result.is_err());
    }
}
