use std::io::Read;
use std::sync::Arc;

use anyhow::{bail, Context};
use envconfig::Envconfig;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use cohort_editor::cohort_models::Cohort;
use cohort_editor::config::Config;
use cohort_editor::errors::CohortError;
use cohort_editor::notify::{LogNotifier, NoopObserver};
use cohort_editor::session::{CohortSession, SaveState};

/// Reads a cohort as JSON on stdin, saves it through the cohorts API and prints
/// the server copy once its membership has been calculated.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_layer = fmt::layer().with_writer(std::io::stderr).with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();

    let config = Config::init_from_env().context("invalid configuration")?;

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read cohort from stdin")?;
    let cohort: Cohort = serde_json::from_str(&input).context("failed to parse cohort JSON")?;

    let session = CohortSession::from_config(
        &config,
        Arc::new(LogNotifier),
        Arc::new(NoopObserver),
    )?;
    session.set_cohort(cohort);

    match session.submit().await {
        Ok(_) => {}
        Err(CohortError::Invalid(errors)) => {
            eprintln!("{}", serde_json::to_string_pretty(&errors)?);
            bail!("cohort is invalid");
        }
        Err(e) => return Err(e.into()),
    }

    if session.wait_until_settled().await? != SaveState::Settled {
        bail!("cohort was saved but its calculation status is unknown");
    }

    println!("{}", serde_json::to_string_pretty(&session.cohort())?);
    Ok(())
}
