use std::io::Write;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{debug, info};

use crate::boundary::{Boundary, BoundaryRequest, Environment, Response};
use crate::cli::args::{ConfigAction, ConfigArgs, InitArgs, OutputFormat, RunArgs, ServeArgs};
use crate::config::loader::get_config_path;
use crate::config::types::ScriptboxConfig;
use crate::error::{Result, SandboxError};
use crate::runtime::{PythonRuntime, ScriptRuntime};
use crate::sandbox::{Channel, ReportOutcome, RunReport, RunRequest, ScriptFile};

// ============================================================================
// Run Commands
// ============================================================================

/// Run one script and report what it did
pub async fn run(args: RunArgs, mut config: ScriptboxConfig, format: OutputFormat) -> Result<()> {
    if let Some(workdir) = args.workdir {
        config.runtime.workdir = Some(workdir);
    }
    config.runtime.env.extend(args.env_vars);
    if args.timeout.is_some() {
        config.boundary.timeout_seconds = args.timeout;
    }

    let body = match &args.file {
        Some(path) => tokio::fs::read(path).await?,
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin().read_to_end(&mut buf).await?;
            buf
        }
    };
    let name = args
        .name
        .clone()
        .or_else(|| args.file.as_deref().and_then(file_name))
        .unwrap_or_else(|| config.boundary.default_file_name.clone());

    info!(script = %name, extra_files = args.with.len(), "Running script");

    let boundary = Boundary::from_config(&config)?;
    let response = if args.with.is_empty() {
        boundary.run_script(Some(&name), &body).await
    } else {
        let source = String::from_utf8(body).map_err(|_| SandboxError::InvalidEncoding)?;
        let mut files = Vec::with_capacity(args.with.len() + 1);
        for path in &args.with {
            let extra = file_name(path).ok_or_else(|| SandboxError::InvalidFileName {
                name: path.display().to_string(),
            })?;
            files.push(ScriptFile::new(extra, tokio::fs::read_to_string(path).await?));
        }
        files.push(ScriptFile::new(name, source).with_active_index(1));
        boundary.run_files(&RunRequest::new(files)).await
    };

    output_response(&response, format)
}

/// Serve run requests, one JSON object per line, until stdin closes
pub async fn serve(args: ServeArgs, mut config: ScriptboxConfig) -> Result<()> {
    if let Some(workdir) = args.workdir {
        config.runtime.workdir = Some(workdir);
    }
    if args.timeout.is_some() {
        config.boundary.timeout_seconds = args.timeout;
    }

    let boundary = Boundary::from_config(&config)?;
    info!("Serving requests on stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<BoundaryRequest>(&line) {
            Ok(request) => boundary.handle(request).await,
            Err(e) => {
                debug!(error = %e, "Rejecting malformed request");
                Response {
                    status: 400,
                    body: serde_json::json!({ "detail": format!("Invalid request: {}", e) }),
                }
            }
        };

        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    info!("Input closed, exiting");
    Ok(())
}

/// Show interpreter and version information
pub async fn info(config: ScriptboxConfig, format: OutputFormat) -> Result<()> {
    let runtime = PythonRuntime::new(&config.runtime)?;
    let environment = Environment {
        version: env!("CARGO_PKG_VERSION").to_string(),
        runtime: runtime.describe().await?,
    };

    match format {
        OutputFormat::Text => {
            println!("scriptbox {}", environment.version);
            println!(
                "{} {} ({})",
                environment.runtime.implementation,
                environment.runtime.version,
                runtime.interpreter().display()
            );
            println!("  build:    {}", environment.runtime.build);
            println!("  platform: {}", environment.runtime.platform);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&environment)?);
        }
    }
    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    // Create parent directories if needed
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write default configuration
    let default_config = ScriptboxConfig::default();
    let toml_str =
        toml::to_string_pretty(&default_config).map_err(|e| SandboxError::Config(e.to_string()))?;

    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Run a script");
    println!("  scriptbox run hello.py");
    println!();
    println!("  # Run a script that imports a local module");
    println!("  scriptbox run app.py --with helpers.py");
    println!();
    println!("  # Serve JSON requests line by line");
    println!("  echo '{{\"code\": \"print(1)\"}}' | scriptbox serve");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: ScriptboxConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml_str =
                toml::to_string_pretty(&config).map_err(|e| SandboxError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

fn output_response(response: &Response, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if !response.is_success() {
                eprintln!("{}", failure_text(response));
                std::process::exit(1);
            }

            let report: RunReport = serde_json::from_value(response.body.clone())?;
            replay(&report)?;
            match &report.result {
                ReportOutcome::Success { return_value } => {
                    if let Some(value) = return_value.as_ref().filter(|v| !v.is_null()) {
                        println!("{}", serde_json::to_string_pretty(value)?);
                    }
                }
                ReportOutcome::Error { error } => {
                    eprint!("{}", error);
                    std::process::exit(1);
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&response.body)?);
            if !response.is_success() {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

/// Write the captured stream back to the terminal, each chunk to the
/// stream it came from.
fn replay(report: &RunReport) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    let mut stderr = std::io::stderr().lock();
    for chunk in &report.stream {
        match chunk.channel {
            Channel::Primary => {
                stdout.write_all(chunk.text.as_bytes())?;
                stdout.flush()?;
            }
            Channel::Diagnostic => {
                stderr.write_all(chunk.text.as_bytes())?;
                stderr.flush()?;
            }
        }
    }
    Ok(())
}

fn failure_text(response: &Response) -> String {
    let message = response
        .body
        .get("detail")
        .or_else(|| response.body.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown error");
    format!("Error ({}): {}", response.status, message)
}
