//! Graft - LLM-driven repository integration
//!
//! Clones a source repository, analyzes it against your instructions,
//! applies the changes file by file, and reports the resulting diff.

use anyhow::Result;
use clap::Parser;
use graft_adapters::config::{Config, RunOptions};
use graft_adapters::git_ops::GitRepositoryProvider;
use graft_adapters::github::GitHubMetadataProvider;
use graft_core::protocol::Event;
use graft_engine::IntegrationService;
use std::io::{BufRead, Write};

#[derive(Parser, Debug)]
#[command(
    name = "graft",
    about = "LLM-driven repository integration pipeline",
    version
)]
struct Args {
    /// Source repository URL (e.g. https://github.com/owner/repo)
    url: String,

    /// Natural-language integration instructions
    instructions: String,

    /// Only validate that the repository exists and exit
    #[arg(long)]
    validate: bool,

    /// Skip the interactive approval prompt
    #[arg(long, short = 'y')]
    yes: bool,

    /// Print the full results as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load();
    let service = IntegrationService::new(
        GitRepositoryProvider::new(RunOptions::default()),
        GitHubMetadataProvider,
        config,
    );

    if args.validate {
        let valid = service.validate(&args.url).await;
        println!("{}", if valid { "valid" } else { "invalid" });
        if !valid {
            std::process::exit(1);
        }
        return Ok(());
    }

    if let Some(info) = service.repository_info(&args.url).await {
        if let Some(description) = info.get("description").and_then(|d| d.as_str()) {
            eprintln!("  {}", description);
        }
    }

    if !args.yes && !confirm_run(&args.url, &args.instructions)? {
        eprintln!("Aborted.");
        return Ok(());
    }

    let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            match event {
                Event::StageStarted { agent } => {
                    eprintln!("  -> {}", agent.name());
                }
                Event::StageCompleted { agent, detail } => {
                    eprintln!("  ok {} ({})", agent.name(), detail);
                }
                Event::PipelineFinished { terminal } => {
                    eprintln!("  done: {}", terminal.name());
                }
            }
        }
    });

    let run_result = service.run(&args.url, &args.instructions, Some(sender)).await;
    let _ = printer.await;
    let results = run_result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if let Some(failure) = &results.failure {
        eprintln!("\n{}", failure);
        if let Some(research) = results.research.last() {
            for recommendation in &research.recommendations {
                eprintln!("  - {}", recommendation);
            }
        }
        std::process::exit(1);
    }

    if let Some(summary) = &results.summary {
        println!("\n{}", summary);
    }
    if let Some(diff) = &results.diff {
        for file_diff in &diff.file_diffs {
            println!("\n{}", file_diff.diff_text);
        }
    }

    Ok(())
}

/// Interactive approval gate: the pipeline never advances without it.
fn confirm_run(url: &str, instructions: &str) -> Result<bool> {
    eprintln!("About to integrate {} with instructions:", url);
    eprintln!("  {}", instructions);
    eprint!("Proceed? [y/N] ");
    std::io::stderr().flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let answer = line.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}
