use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eatwhat::{
    cache::ResultCache,
    commands::{CommandHandler, PageMove, Reply},
    config::AppConfig,
    discovery::{DiscoveryLoop, Termination},
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eatwhat", version, about = "Find places to eat near a landmark")]
struct Cli {
    /// Configuration file (defaults to ./eatwhat.toml when present)
    #[arg(short, long, global = true, env = "EATWHAT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover venues near a landmark and print them
    Discover {
        /// Landmark to search around
        landmark: String,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read bot commands from stdin, e.g. `/eatwhat 台北101`
    Shell {
        /// User id the commands are issued as
        #[arg(long)]
        user: Option<u64>,
    },
}

/// The main entry point of the application.
///
/// Initializes logging, loads the configuration and runs the selected subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `--json` output stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Discover { landmark, json } => discover(&config, &landmark, json).await,
        Command::Shell { user } => {
            let user = user.unwrap_or(config.bot.default_user);
            shell(config, user).await
        }
    }
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

async fn discover(config: &AppConfig, landmark: &str, json: bool) -> Result<()> {
    let discovery = DiscoveryLoop::chromium(config.discovery.clone())?;

    let progress = spinner(format!("Exploring restaurants near '{}'...", landmark));
    let outcome = discovery.run(landmark).await;
    progress.finish_and_clear();
    let outcome = outcome.with_context(|| format!("discovery for '{landmark}' failed"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!("=== {} ===", landmark);
    for (i, venue) in outcome.venues.iter().enumerate() {
        println!("{:>3}. {}\n     {}", i + 1, venue.name, venue.link);
    }
    println!(
        "\nFound {} venues in {:.2?} ({})",
        outcome.venues.len(),
        outcome.elapsed,
        describe_termination(outcome.termination)
    );
    Ok(())
}

fn describe_termination(termination: Termination) -> &'static str {
    match termination {
        Termination::EndOfResults => "reached the end of the list",
        Termination::Stalled => "stopped after no new results",
        Termination::Aborted => "page stopped responding, partial list",
    }
}

async fn shell(config: AppConfig, user: u64) -> Result<()> {
    let discovery = DiscoveryLoop::chromium(config.discovery.clone())?;
    let handler = CommandHandler::new(Arc::new(ResultCache::new()), Arc::new(discovery), config.bot);

    println!("Commands: /eatwhat <landmark>, /ewrandom <landmark>, /ewclear <landmark>, /next, /prev, /list [query], /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, argument) = match line.split_once(char::is_whitespace) {
            Some((command, argument)) => (command, argument.trim()),
            None => (line, ""),
        };

        let reply = match command {
            "/eatwhat" => {
                let progress = spinner(format!("正在探索 `{}` 附近的餐廳...", argument));
                let reply = handler.eatwhat(user, argument).await;
                progress.finish_and_clear();
                reply
            }
            "/ewrandom" => handler.ewrandom(user, argument),
            "/ewclear" => handler.ewclear(user, argument),
            "/next" => handler.move_page(user, PageMove::Next),
            "/prev" => handler.move_page(user, PageMove::Previous),
            "/list" => {
                for label in handler.autocomplete(user, argument) {
                    println!("  {}", label);
                }
                continue;
            }
            "/quit" | "/exit" => break,
            other => {
                println!("Unknown command: {}", other);
                continue;
            }
        };

        println!("{}", render(&reply));
    }

    Ok(())
}

fn render(reply: &Reply) -> String {
    match reply {
        Reply::Results {
            label,
            page,
            termination,
            ..
        } => {
            let mut out = format!(
                "{} - page {}/{} ({} venues)\n",
                label,
                page.index + 1,
                page.count,
                page.total
            );
            for venue in &page.venues {
                out.push_str(&format!("  {}\n", venue.markdown()));
            }
            if let Some(termination) = termination {
                out.push_str(&format!("({})\n", describe_termination(*termination)));
            }
            if page.count > 1 {
                let prev = if page.is_first() { "" } else { "/prev " };
                let next = if page.is_last() { "" } else { "/next" };
                out.push_str(&format!("{}{}", prev, next));
            }
            out.trim_end().to_string()
        }
        Reply::Recommendation { label, venue } => format!("[{}] {}", label, venue.markdown()),
        Reply::Cleared { label } => format!("Cleared results for `{}`.", label),
        Reply::NoData { label: Some(label) } => {
            format!("No venues stored for `{}`. Run /eatwhat {} first.", label, label)
        }
        Reply::NoData { label: None } => "No search to page through. Run /eatwhat first.".to_string(),
        Reply::Error { message } => format!("Error: {}", message),
    }
}
