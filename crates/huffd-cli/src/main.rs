use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use huffd::{CodeTable, JobEvent, JobService, JobStatus, Overrides, Settings, TimeoutPolicy};
use huffd_cli::{JobClient, logging};

#[derive(Parser)]
#[command(name = "huffd")]
#[command(about = "Huffman encode/decode job server with live progress")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Start the server on the default port
    huffd serve

    # Encode text
    huffd encode --session alice --data aaab

    # Decode it again
    huffd decode --session alice --data 4A== --codes '{"a":"1","b":"0"}' --padding 4
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (HUFFD_* environment variables apply; flags override them)
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Concurrent codec workers
        #[arg(long)]
        workers: Option<usize>,

        /// Seconds a connection waits for its job to finish
        #[arg(long)]
        job_timeout_secs: Option<u64>,

        /// Progress checkpoints per job (must divide 100)
        #[arg(long)]
        checkpoints: Option<u8>,

        /// What to do with a job whose wait timed out
        #[arg(long, value_parser = parse_policy)]
        timeout_policy: Option<TimeoutPolicy>,

        /// Ignore SIGTERM; stop only on SIGINT or POST /shutdown
        #[arg(long)]
        await_explicit_shutdown: bool,
    },

    /// Encode text on a running server
    Encode {
        #[command(flatten)]
        target: Target,

        /// Text to encode
        #[arg(long)]
        data: String,
    },

    /// Decode a base64 payload on a running server
    Decode {
        #[command(flatten)]
        target: Target,

        /// Base64 payload from a previous encode
        #[arg(long)]
        data: String,

        /// Code table as JSON, e.g. '{"a":"0","b":"1"}'
        #[arg(long)]
        codes: String,

        /// Zero bits appended to the last byte (0-7)
        #[arg(long)]
        padding: u8,
    },
}

#[derive(clap::Args)]
struct Target {
    /// Server base URL
    #[arg(long, env = "HUFFD_URL", default_value = "ws://localhost:8000")]
    server: String,

    /// Session identifier grouping your jobs
    #[arg(long)]
    session: String,
}

fn parse_policy(s: &str) -> Result<TimeoutPolicy, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            workers,
            job_timeout_secs,
            checkpoints,
            timeout_policy,
            await_explicit_shutdown,
        } => {
            let settings = Settings::from_env()
                .context("invalid HUFFD_* configuration")?
                .with_overrides(Overrides {
                    host,
                    port,
                    workers,
                    job_timeout_secs,
                    checkpoints,
                    timeout_policy,
                    await_explicit_shutdown,
                })
                .context("invalid command-line option")?;

            let service = Arc::new(JobService::new(&settings));
            huffd::transport::serve(settings.server.clone(), service).await?;
        }
        Commands::Encode { target, data } => {
            let client = JobClient::new(target.server, target.session);
            let result = client.encode(&data, progress("Encoding")).await?;

            println!("\nEncoding result:");
            println!("Encoded data: {}", result.encoded_data);
            println!(
                "Huffman codes: {}",
                serde_json::to_string_pretty(&result.huffman_codes)?
            );
            println!("Padding: {}", result.padding);
        }
        Commands::Decode {
            target,
            data,
            codes,
            padding,
        } => {
            let codes: CodeTable =
                serde_json::from_str(&codes).context("Invalid Huffman codes JSON format")?;
            let client = JobClient::new(target.server, target.session);
            let decoded = client
                .decode(&data, &codes, padding, progress("Decoding"))
                .await?;

            println!("\nDecoded result:");
            println!("{decoded}");
        }
    }

    Ok(())
}

/// Prints job progress to stderr.
fn progress(label: &'static str) -> impl FnMut(&JobEvent) {
    move |event| match event.status {
        JobStatus::Started => eprintln!("Starting {} task {}", label.to_lowercase(), event.task_id),
        JobStatus::Progress => eprintln!("{label}: {}%", event.progress.unwrap_or(0)),
        JobStatus::Completed | JobStatus::Error => {}
    }
}
