use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Local, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::args::{
    ConfigAction, ConfigArgs, ExecArgs, FsAction, FsArgs, KillArgs, LogsArgs, OutputFormat,
    PortAction, PortArgs, StartArgs,
};
use crate::client::completion;
use crate::client::{
    DirEntry, LogEntry, PortStatus, RunRequest, RunResult, SandboxClient, StartProcessRequest,
};
use crate::config::loader::get_config_path;
use crate::config::types::SandboxctlConfig;
use crate::error::{Result, SandboxError};

/// Uploads above this size log a warning.
const UPLOAD_WARN_BYTES: u64 = 10 * 1024 * 1024;
/// Uploads above this size are refused.
const UPLOAD_MAX_BYTES: u64 = 100 * 1024 * 1024;

// ============================================================================
// Execution Commands
// ============================================================================

/// Run a command, buffered or streamed. Returns the remote exit code for the
/// process to exit with, in every output format.
pub async fn exec(
    args: ExecArgs,
    client: &SandboxClient,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<i32> {
    info!(command = %args.command, stream = args.stream, "Executing command");

    let mut request = RunRequest::new(args.command);
    if let Some(cwd) = args.cwd {
        request = request.cwd(cwd);
    }
    for (key, value) in args.env_vars {
        request = request.env(key, value);
    }
    if let Some(timeout) = args.timeout {
        request = request.timeout(timeout);
    }

    if args.stream {
        return exec_streaming(&request, client, format, cancel).await;
    }

    let result = client.run(&request, cancel).await?;
    output_run_result(&result, format);
    Ok(result.exit_code)
}

async fn exec_streaming(
    request: &RunRequest,
    client: &SandboxClient,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<i32> {
    let (sender, waiter) = completion::channel();

    let stream = client.run_streaming(
        request,
        cancel,
        |stream, data| match format {
            OutputFormat::Text => {
                if stream == "stderr" {
                    eprint!("{}", data);
                } else {
                    print!("{}", data);
                    let _ = std::io::stdout().flush();
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({ "event": "output", "stream": stream, "data": data })
                );
            }
        },
        move |code, had_error| sender.complete(code, had_error),
    );

    let (streamed, completed) = tokio::join!(stream, waiter.wait());
    streamed?;
    let completion = completed?;

    if let OutputFormat::Json = format {
        println!(
            "{}",
            serde_json::json!({
                "event": "complete",
                "exit_code": completion.code,
                "error": completion.had_error,
            })
        );
    }

    Ok(completion.code)
}

// ============================================================================
// Process Commands
// ============================================================================

pub async fn start(
    args: StartArgs,
    client: &SandboxClient,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    info!(command = %args.command, "Starting background process");

    let mut request = StartProcessRequest::new(args.command);
    if let Some(cwd) = args.cwd {
        request = request.cwd(cwd);
    }
    for (key, value) in args.env_vars {
        request = request.env(key, value);
    }

    let started = client.start_process(&request, cancel).await?;

    match format {
        OutputFormat::Text => println!("{}", started.id),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&started)?),
    }
    Ok(())
}

pub async fn ps(
    client: &SandboxClient,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    let processes = client.list_processes(cancel).await?;

    match format {
        OutputFormat::Text => {
            if processes.is_empty() {
                println!("No processes");
                return Ok(());
            }
            println!(
                "{:<16} {:<8} {:<10} {:<20} COMMAND",
                "ID", "PID", "STATUS", "STARTED"
            );
            println!("{}", "-".repeat(70));
            for process in processes {
                let pid = process
                    .pid
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let started = process
                    .started_at
                    .map(format_timestamp)
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<16} {:<8} {:<10} {:<20} {}",
                    process.id, pid, process.status, started, process.command
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&processes)?),
    }
    Ok(())
}

pub async fn kill(
    args: KillArgs,
    client: &SandboxClient,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    info!(id = %args.id, signal = ?args.signal, "Killing process");

    match &args.signal {
        Some(signal) => client.kill_process_with_signal(&args.id, signal, cancel).await?,
        None => client.kill_process(&args.id, cancel).await?,
    }

    match format {
        OutputFormat::Text => println!("Process '{}' killed", args.id),
        OutputFormat::Json => println!("{}", serde_json::json!({ "killed": args.id })),
    }
    Ok(())
}

pub async fn logs(
    args: LogsArgs,
    client: &SandboxClient,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    client
        .stream_process_logs(&args.id, args.follow, cancel, |entry| {
            output_log_entry(entry, format)
        })
        .await
}

// ============================================================================
// Filesystem Commands
// ============================================================================

pub async fn fs(
    args: FsArgs,
    client: &SandboxClient,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    match args.action {
        FsAction::Ls { path } => {
            let entries = client.list_dir(&path, cancel).await?;
            output_entries(&entries, format)?;
        }
        FsAction::Stat { path } => {
            let entry = client.stat_file(&path, cancel).await?;
            match format {
                OutputFormat::Text => {
                    println!("Name:     {}", entry.name);
                    println!("Type:     {}", if entry.is_dir { "directory" } else { "file" });
                    println!("Size:     {}", format_size(entry.size));
                    if !entry.mode.is_empty() {
                        println!("Mode:     {}", entry.mode);
                    }
                    if let Some(modified) = entry.mod_time {
                        println!("Modified: {}", format_timestamp(modified));
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entry)?),
            }
        }
        FsAction::Cat { path } => {
            let content = client.read_file(&path, cancel).await?;
            std::io::stdout().write_all(&content)?;
        }
        FsAction::Get { remote, local } => {
            let content = client.read_file(&remote, cancel).await?;
            match local {
                Some(local) => {
                    tokio::fs::write(&local, &content).await?;
                    report_transfer(&remote, &local, content.len(), format);
                }
                None => std::io::stdout().write_all(&content)?,
            }
        }
        FsAction::Put { local, remote } => {
            let content = read_upload(&local).await?;
            client.write_file_bytes(&remote, &content, cancel).await?;
            report_transfer(&remote, &local, content.len(), format);
        }
        FsAction::Rm { path } => {
            client.delete_file(&path, cancel).await?;
            report_done("deleted", &path, format);
        }
        FsAction::Mkdir { path } => {
            client.make_dir(&path, cancel).await?;
            report_done("created", &path, format);
        }
        FsAction::Rmdir { path } => {
            client.delete_dir(&path, cancel).await?;
            report_done("deleted", &path, format);
        }
    }
    Ok(())
}

async fn read_upload(local: &Path) -> Result<Vec<u8>> {
    let size = tokio::fs::metadata(local).await?.len();
    if size > UPLOAD_MAX_BYTES {
        return Err(SandboxError::InvalidArgument(format!(
            "{} is {}, uploads are limited to {}",
            local.display(),
            format_size(size),
            format_size(UPLOAD_MAX_BYTES)
        )));
    }
    if size > UPLOAD_WARN_BYTES {
        warn!(path = %local.display(), size = %format_size(size), "Uploading a large file");
    }
    Ok(tokio::fs::read(local).await?)
}

// ============================================================================
// Port Commands
// ============================================================================

pub async fn port(
    args: PortArgs,
    client: &SandboxClient,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    match args.action {
        PortAction::Bind { port } => {
            let binding = client.bind_port(port, cancel).await?;
            match format {
                OutputFormat::Text => match binding.proxy_port {
                    Some(proxy) => println!("Port {} bound (proxy port {})", binding.port, proxy),
                    None => println!("Port {} bound", binding.port),
                },
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&binding)?),
            }
        }
        PortAction::Unbind => {
            let released = client.unbind_port(cancel).await?;
            match format {
                OutputFormat::Text if released => println!("Port unbound"),
                OutputFormat::Text => println!("No port was bound"),
                OutputFormat::Json => println!("{}", serde_json::json!({ "unbound": released })),
            }
        }
        PortAction::Status => {
            let status = client.get_port_status(cancel).await?;
            match (format, status) {
                (OutputFormat::Text, PortStatus::Unbound) => println!("No port bound"),
                (OutputFormat::Text, PortStatus::Bound { port, proxy_port }) => match proxy_port {
                    Some(proxy) => println!("Port {} bound (proxy port {})", port, proxy),
                    None => println!("Port {} bound", port),
                },
                (OutputFormat::Json, PortStatus::Unbound) => {
                    println!("{}", serde_json::json!({ "bound": false }))
                }
                (OutputFormat::Json, PortStatus::Bound { port, proxy_port }) => println!(
                    "{}",
                    serde_json::json!({ "bound": true, "port": port, "proxy_port": proxy_port })
                ),
            }
        }
    }
    Ok(())
}

// ============================================================================
// Health Command
// ============================================================================

/// Print sandbox health. Returns exit status 1 when unhealthy.
pub async fn health(
    client: &SandboxClient,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<i32> {
    let health = client.health(cancel).await?;

    match format {
        OutputFormat::Text => {
            println!("Status:  {}", health.status);
            if let Some(version) = &health.version {
                println!("Version: {}", version);
            }
            if let Some(uptime) = &health.uptime {
                println!("Uptime:  {}", uptime);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&health)?),
    }

    Ok(if health.healthy { 0 } else { 1 })
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn config(args: ConfigArgs, config: SandboxctlConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let mut shown = config;
            if shown.sandbox.token.is_some() {
                shown.sandbox.token = Some("<redacted>".to_string());
            }
            let toml_str =
                toml::to_string_pretty(&shown).map_err(|e| SandboxError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
        ConfigAction::Init { force } => init(force)?,
    }
    Ok(())
}

fn init(force: bool) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let toml_str = toml::to_string_pretty(&SandboxctlConfig::default())
        .map_err(|e| SandboxError::Config(e.to_string()))?;
    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Point at a sandbox (or set sandbox.domain in the file)");
    println!("  export SANDBOXCTL_DOMAIN=my-box.example.com SANDBOXCTL_TOKEN=...");
    println!();
    println!("  # Run a command");
    println!("  sandboxctl exec \"ls -la\"");
    println!();
    println!("  # Stream a long-running build");
    println!("  sandboxctl exec --stream \"make test\"");

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn output_run_result(result: &RunResult, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            if !result.stdout.is_empty() {
                print!("{}", result.stdout);
            }
            if !result.stderr.is_empty() {
                eprint!("{}", result.stderr);
            }
            if let Some(error) = result.error.as_deref().filter(|e| !e.is_empty()) {
                eprintln!("sandbox: {}", error);
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "stdout": result.stdout,
                    "stderr": result.stderr,
                    "exit_code": result.exit_code,
                    "error": result.error,
                })
            );
        }
    }
}

fn output_log_entry(entry: &LogEntry, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            let line = match entry.timestamp {
                Some(ts) => format!("[{}] {}", format_timestamp(ts), entry.data),
                None => entry.data.clone(),
            };
            let line = line.trim_end_matches('\n');
            if entry.stream == "stderr" {
                eprintln!("{}", line);
            } else {
                println!("{}", line);
            }
        }
        OutputFormat::Json => match serde_json::to_string(entry) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!(error = %e, "Failed to encode log entry"),
        },
    }
}

fn output_entries(entries: &[DirEntry], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for entry in entries {
                let modified = entry
                    .mod_time
                    .map(format_timestamp)
                    .unwrap_or_else(|| "-".to_string());
                let name = if entry.is_dir {
                    format!("{}/", entry.name)
                } else {
                    entry.name.clone()
                };
                println!(
                    "{:<11} {:>9} {:<20} {}",
                    if entry.mode.is_empty() { "-" } else { &entry.mode },
                    format_size(entry.size),
                    modified,
                    name
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(entries)?),
    }
    Ok(())
}

fn report_transfer(remote: &str, local: &Path, bytes: usize, format: OutputFormat) {
    match format {
        OutputFormat::Text => println!(
            "{} <-> {} ({})",
            local.display(),
            remote,
            format_size(bytes as u64)
        ),
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "remote": remote,
                "local": local.display().to_string(),
                "bytes": bytes,
            })
        ),
    }
}

fn report_done(action: &str, path: &str, format: OutputFormat) {
    match format {
        OutputFormat::Text => println!("{} {}", path, action),
        OutputFormat::Json => println!("{}", serde_json::json!({ action: path })),
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    let local: DateTime<Local> = timestamp.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    if bytes < KIB {
        format!("{}B", bytes)
    } else if bytes < MIB {
        format!("{:.1}K", bytes as f64 / KIB as f64)
    } else if bytes < GIB {
        format!("{:.1}M", bytes as f64 / MIB as f64)
    } else {
        format!("{:.1}G", bytes as f64 / GIB as f64)
    }
}
