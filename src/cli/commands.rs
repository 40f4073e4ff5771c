use std::io::Read;

use tracing::info;

use crate::cli::args::{
    ConfigAction, ConfigArgs, ExecArgs, GenerateArgs, InitArgs, OutputFormat, ServeArgs,
};
use crate::config::loader::get_config_path;
use crate::config::types::VoxConfig;
use crate::error::{Result, VoxError};
use crate::generator::{CodeGenerator, GenerationRequest};
use crate::providers::create_provider;
use crate::sandbox::{available_backends, ExecutionResult, Sandbox};
use crate::server::{self, AppState};

// ============================================================================
// Service Commands
// ============================================================================

/// Start the HTTP gateway
pub async fn serve(args: ServeArgs, mut config: VoxConfig) -> Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(backend) = args.backend {
        config.sandbox.backend = backend;
    }
    config.validate()?;

    let state = AppState::from_config(&config).await?;
    server::serve(&config.server, state).await
}

/// Generate code from a description, optionally running it
pub async fn generate(args: GenerateArgs, config: VoxConfig, format: OutputFormat) -> Result<()> {
    config.validate()?;

    let provider_name = args
        .provider
        .as_deref()
        .unwrap_or(&config.generator.provider);
    let model = args.model.as_deref().or(config.generator.model.as_deref());

    let provider = create_provider(provider_name, model, &config)?;
    let generator = CodeGenerator::new(provider, &config.generator);

    let result = generator.generate(&GenerationRequest::new(args.text)).await?;

    let execution = if args.run {
        let sandbox = Sandbox::from_config(&config.sandbox).await?;
        Some(sandbox.execute(&result.code).await?)
    } else {
        None
    };

    match format {
        OutputFormat::Text => {
            println!("{}", result.code);
            if let Some(execution) = &execution {
                println!("{}", "-".repeat(70));
                output_execution_result(execution, OutputFormat::Text);
            }
        }
        OutputFormat::Json => {
            let mut json = serde_json::json!({
                "code": result.code,
                "language": result.language.name(),
                "model": result.model,
                "extraction": result.source,
                "usage": {
                    "input_tokens": result.usage.input_tokens,
                    "output_tokens": result.usage.output_tokens,
                },
            });
            if let Some(execution) = &execution {
                json["execution"] = execution_json(execution);
            }
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }

    if let Some(execution) = &execution {
        exit_on_failure(execution);
    }
    Ok(())
}

/// Run a source file in the sandbox
pub async fn exec(args: ExecArgs, mut config: VoxConfig, format: OutputFormat) -> Result<()> {
    if let Some(backend) = args.backend {
        config.sandbox.backend = backend;
    }
    config.validate()?;

    let code = if args.file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(&args.file)?
    };

    let sandbox = Sandbox::from_config(&config.sandbox).await?;

    let mut limits = sandbox.default_limits().clone();
    if let Some(timeout) = args.timeout {
        limits = limits.with_timeout(timeout);
    }
    if let Some(max_output) = args.max_output {
        limits = limits.with_max_output_bytes(max_output);
    }

    info!(backend = sandbox.backend_name(), "Running job");
    let result = sandbox.submit(&code, limits).await?;

    output_execution_result(&result, format);
    exit_on_failure(&result);
    Ok(())
}

/// List isolation backends
pub async fn backends(config: VoxConfig, format: OutputFormat) -> Result<()> {
    let backends = available_backends(&config.sandbox);

    match format {
        OutputFormat::Text => {
            println!("{:<10} {:<10} DESCRIPTION", "BACKEND", "STATUS");
            println!("{}", "-".repeat(70));
            for backend in &backends {
                let status = if backend.available {
                    "available"
                } else {
                    "missing"
                };
                println!(
                    "{:<10} {:<10} {}",
                    backend.name, status, backend.description
                );
                if let Some(reason) = backend.unavailable_reason {
                    println!("{:<21} ({})", "", reason);
                }
            }
        }
        OutputFormat::Json => {
            let json_backends: Vec<_> = backends
                .iter()
                .map(|b| {
                    serde_json::json!({
                        "name": b.name,
                        "available": b.available,
                        "description": b.description,
                        "unavailable_reason": b.unavailable_reason,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json_backends)?);
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
    let default_config = VoxConfig::default();
    let toml_str =
        toml::to_string_pretty(&default_config).map_err(|e| VoxError::Config(e.to_string()))?;

    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Set the provider key (or put it in .env)");
    println!("  export OPENAI_API_KEY=...");
    println!();
    println!("  # Start the gateway");
    println!("  voxcode serve --port 3000");
    println!();
    println!("  # Or generate and run from the command line");
    println!("  voxcode generate --run \"print the first ten primes\"");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: VoxConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml_str =
                toml::to_string_pretty(&config).map_err(|e| VoxError::Config(e.to_string()))?;
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

fn execution_json(result: &ExecutionResult) -> serde_json::Value {
    serde_json::json!({
        "job_id": result.job_id,
        "status": result.status,
        "stdout": result.stdout,
        "stderr": result.stderr,
        "exit_code": result.exit_code,
        "signal": result.signal,
        "truncated": result.truncated(),
        "duration_ms": u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
        "backend": result.backend,
    })
}

fn output_execution_result(result: &ExecutionResult, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            if !result.stdout.is_empty() {
                print!("{}", result.stdout);
            }
            if !result.stderr.is_empty() {
                eprint!("{}", result.stderr);
            }
            if let Some(failure) = result.failure() {
                eprintln!("Error: {}", failure);
            }
        }
        OutputFormat::Json => {
            println!("{}", execution_json(result));
        }
    }
}

/// Process exit code for a job that did not complete: the job's own code
/// when it has a non-zero one, 1 otherwise.
fn failure_exit_code(result: &ExecutionResult) -> Option<i32> {
    result
        .failure()
        .map(|_| result.exit_code.filter(|c| *c != 0).unwrap_or(1))
}

fn exit_on_failure(result: &ExecutionResult) {
    if let Some(code) = failure_exit_code(result) {
        std::process::exit(code);
    }
}
