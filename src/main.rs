use std::{
    fmt,
    path::PathBuf,
    sync::Arc,
};

use tokio::{
    fs,
    sync::watch,
};

use env_logger::Env;
use log::{info, warn};

use clap::{Parser, Subcommand};
use anyhow;

use tracker::{
    config::{self, Config, ProtocolRevision},
    job::Progress,
    Delegation, DelegatorClient, Legacy, Outcome, Protocol,
    SubscriptionHandle, TrackError, Tracker,
    verify_artifact,
};
use verifier::{
    Executor, Registry,
};

// CLI
#[derive(Parser, Debug)]
#[command(name = "Job tracker for Zetina")]
#[command(author = "Zetina team")]
#[command(version = "0.1")]
#[command(about = "Zetina is a p2p proving network and this program \
                   delegates Cairo jobs to it and verifies their proofs.",
          long_about = None)
]
struct Cli {
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    #[arg(long)]
    api_url: Option<String>,

    #[arg(long, value_enum)]
    protocol: Option<ProtocolRevision>,

    // events of another job abort tracking
    #[arg(long, action)]
    dev: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delegate a Cairo PIE and follow the job until its proof is verified
    Submit {
        pie: PathBuf,
    },

    /// Follow a job that was already delegated
    Watch {
        job: String,
    },

    /// Verify a proof file
    Verify {
        proof: PathBuf,
    },
}

enum Target {
    Pie(PathBuf),
    Job(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .init();
    let cli = Cli::parse();
    info!("<-> `Tracker` for Zetina network <->");

    let config = load_config(&cli)?;
    info!("Operating mode: `{}` correlation",
        if false == config.strict_correlation { "lenient" } else { "strict(development)" }
    );

    let executor = Executor::new(Arc::new(Registry::builtin()));
    let target = match cli.command {
        Command::Verify { proof } => {
            let artifact = fs::read(&proof).await?;
            let outcome = verify_artifact(&executor, &artifact).await;
            println!("`{}`: {outcome}", proof.display());
            return conclude(&outcome)
        },

        Command::Submit { pie } => Target::Pie(pie),

        Command::Watch { job } => Target::Job(job),
    };
    match config.protocol {
        ProtocolRevision::Delegation => follow::<Delegation>(&config, executor, target).await,

        ProtocolRevision::Legacy => follow::<Legacy>(&config, executor, target).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config_file {
        Some(path) => Config::load(path)?,

        None => match config::default_path() {
            Ok(path) if path.exists() => Config::load(&path)?,

            _ => Config::default(),
        },
    };
    if let Some(api_url) = &cli.api_url {
        config.api_url = api_url.clone();
    }
    if let Some(protocol) = cli.protocol {
        config.protocol = protocol;
    }
    if cli.dev {
        config.strict_correlation = true;
    }
    Ok(config)
}

async fn follow<P: Protocol>(
    config: &Config,
    executor: Executor,
    target: Target,
) -> anyhow::Result<()> {
    let client = DelegatorClient::new(config)?;
    let mut tracker = Tracker::<P>::new(executor)
        .strict(config.strict_correlation);
    let id = match target {
        Target::Pie(path) => {
            let pie = fs::read(&path).await?;
            tracker.submit(&client, pie).await?
        },

        Target::Job(job) => {
            let id = P::parse_id(&job)?;
            tracker.track(id.clone());
            id
        },
    };
    tracker.attach(client.subscribe::<P>(&id));
    let handle = tracker
        .subscription_handle()
        .ok_or(TrackError::NoActiveJob)?;
    let watcher = tokio::spawn(watch_progress(tracker.progress(), handle));

    let report = tracker.run().await;
    watcher.abort();
    let report = report?;
    if let Some(artifact) = &report.artifact {
        let path = save_proof(config, &report.job, artifact).await?;
        info!("Proof is saved to `{}`", path.display());
    }
    println!("Job `{}` ended at `{}`: {}", report.job, report.stage, report.outcome);
    conclude(&report.outcome)
}

// prints progress and stops listening on ctrl-c
async fn watch_progress(
    mut progress: watch::Receiver<Option<Progress>>,
    handle: SubscriptionHandle,
) {
    loop {
        tokio::select! {
            changed = progress.changed() => {
                if changed.is_err() {
                    break
                }
                if let Some(p) = progress.borrow_and_update().as_ref() {
                    println!("{p}");
                }
            },

            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, no longer listening for job events.");
                handle.close();
                break
            },
        }
    }
}

async fn save_proof(
    config: &Config,
    job: &impl fmt::Display,
    artifact: &[u8],
) -> anyhow::Result<PathBuf> {
    let dir = config.output_dir()?;
    fs::create_dir_all(&dir).await?;
    let path = dir.join(format!("{job}_proof.json"));
    fs::write(&path, artifact).await?;
    Ok(path)
}

fn conclude(outcome: &Outcome) -> anyhow::Result<()> {
    match outcome {
        Outcome::Verified { .. } => Ok(()),

        _ => Err(anyhow::anyhow!("No verified proof: {outcome}")),
    }
}
