//! sandpit CLI - run snippets locally through the sandbox core

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sandpit_core::protocol::{ExecuteRequest, ExecuteResponse, LanguageInfo};
use sandpit_core::{LanguageRegistry, Sandbox, SandboxConfig};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "sandpit")]
#[command(author, version, about = "Run untrusted code snippets in throwaway workspaces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a source file directly (without the daemon)
    Run {
        /// Source file to execute (or - for stdin)
        file: PathBuf,

        /// Language identifier; inferred from the file extension when omitted
        #[arg(short, long)]
        language: Option<String>,

        /// Text fed to the program's standard input
        #[arg(short, long, conflicts_with = "input_file")]
        input: Option<String>,

        /// File whose contents are fed to standard input
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Timeout in milliseconds
        #[arg(short, long, default_value = "7000")]
        timeout: u64,

        /// Print the JSON response instead of the program output
        #[arg(long)]
        json: bool,
    },

    /// List supported languages
    Languages,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sandpit=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            language,
            input,
            input_file,
            timeout,
            json,
        } => {
            let code = read_source(&file)?;
            let language = match language {
                Some(language) => language,
                None => infer_language(&file)
                    .with_context(|| format!("cannot infer language of {}, pass --language", file.display()))?,
            };
            let input = match (input, input_file) {
                (Some(input), _) => input,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, None) => String::new(),
            };

            let config = SandboxConfig::builder().timeout_ms(timeout).build();
            let sandbox = Sandbox::new(config)?;
            let outcome = sandbox
                .execute(ExecuteRequest::new(language, code).with_input(input))
                .await?;
            let report = outcome.report();

            if json {
                let response = ExecuteResponse { run: report.clone() };
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                if !outcome.stdout.is_empty() {
                    print!("{}", outcome.stdout);
                }
                if !outcome.stderr.is_empty() {
                    eprint!("{}", outcome.stderr);
                }
            }

            let code = report.code.and_then(|c| u8::try_from(c).ok()).unwrap_or(1);
            Ok(ExitCode::from(code))
        }

        Commands::Languages => {
            for recipe in LanguageRegistry::global().recipes() {
                let info = LanguageInfo::from(recipe);
                println!(
                    "{:<12} {:<10} {}",
                    info.name,
                    info.source_file,
                    info.aliases.join(", ")
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn read_source(file: &Path) -> Result<String> {
    if file.as_os_str() == "-" {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("failed to read code from stdin")?;
        return Ok(code);
    }
    std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))
}

/// Match the file extension against the registry's canonical source files
fn infer_language(file: &Path) -> Option<String> {
    let ext = file.extension()?.to_str()?;
    LanguageRegistry::global()
        .recipes()
        .find(|recipe| {
            Path::new(recipe.source_file)
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(ext))
        })
        .map(|recipe| recipe.name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_language_from_extension() {
        assert_eq!(infer_language(Path::new("solution.py")).as_deref(), Some("python"));
        assert_eq!(infer_language(Path::new("a/b/index.JS")).as_deref(), Some("javascript"));
        assert_eq!(infer_language(Path::new("run.sh")).as_deref(), Some("shell"));
        assert_eq!(infer_language(Path::new("main.rb")), None);
        assert_eq!(infer_language(Path::new("Makefile")), None);
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::parse_from(["sandpit", "run", "main.py", "--input", "3", "-t", "500"]);
        match cli.command {
            Commands::Run {
                input, timeout, ..
            } => {
                assert_eq!(input.as_deref(), Some("3"));
                assert_eq!(timeout, 500);
            }
            Commands::Languages => panic!("expected run"),
        }
    }
}
