use std::env;
use std::error::Error;
use std::io::{self, Write};

use fllume::Agent;
use futures_util::StreamExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let prompt = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        eprintln!("usage: fllume <prompt>");
        std::process::exit(2);
    }

    let model = env::var("FLLUME_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
    let mut builder = Agent::builder().model(model);
    if let Ok(instructions) = env::var("FLLUME_INSTRUCTIONS") {
        builder = builder.instructions(instructions);
    }
    let agent = builder.build()?;

    let stream = agent.complete_stream(prompt);
    futures_util::pin_mut!(stream);

    let mut stdout = io::stdout().lock();
    while let Some(chunk) = stream.next().await {
        stdout.write_all(chunk?.as_bytes())?;
        stdout.flush()?;
    }
    writeln!(stdout)?;

    Ok(())
}
