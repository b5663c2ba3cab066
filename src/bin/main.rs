use clap::Parser;
use petro_analyst::{
    gateway::{OutboundRateLimiter, TracingSink},
    AppConfig, Pipeline, Session, UserResponse,
};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

const HELP: &str = "Ask about Shell, BP, ExxonMobil or Chevron, for example:
  How did Shell perform in Q3 2024?
  Compare BP and Chevron revenue
  ExxonMobil production over the last 4 quarters

Commands: companies, reset, help, exit";

/// Oil & gas financial analyst
#[derive(Debug, Parser)]
#[command(name = "analyst", version, about)]
struct Cli {
    /// Answer a single question and exit
    #[arg(short, long)]
    query: Option<String>,

    /// Backend tried first: openai or gemini
    #[arg(long, env = "PRIMARY_BACKEND")]
    primary: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let mut config = AppConfig::from_env()?;
    if let Some(primary) = cli.primary.as_deref() {
        config.primary = primary.parse()?;
    }

    let limiter = Arc::new(OutboundRateLimiter::per_minute(config.outbound_calls_per_minute));
    let pipeline = Pipeline::from_config(&config, limiter, Arc::new(TracingSink))?;
    let mut session = Session::new(config.pipeline.max_retained_turns);
    info!(session_id = %session.id(), "Analyst session started");

    if let Some(query) = cli.query {
        let response = pipeline.answer(&session, &query).await?;
        print_response(&response);
        return Ok(());
    }

    println!("Oil & Gas Financial Analyst");
    println!("{}\n", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        match input.to_lowercase().as_str() {
            "" => continue,
            "exit" | "quit" => break,
            "help" => println!("{}\n", HELP),
            "reset" => {
                session.close();
                session = Session::new(config.pipeline.max_retained_turns);
                println!("Conversation cleared.\n");
            }
            "companies" => match pipeline.companies().await {
                Ok(companies) => {
                    for company in companies {
                        println!("  {} ({})", company.name, company.ticker);
                    }
                    println!();
                }
                Err(e) => eprintln!("Could not list companies: {}\n", e),
            },
            _ => {
                let response = pipeline.answer(&session, input).await?;
                print_response(&response);
            }
        }
    }

    session.close();
    Ok(())
}

fn print_response(response: &UserResponse) {
    if response.is_degraded() {
        println!("[limited mode]");
    }
    println!("{}\n", response.text);
}
