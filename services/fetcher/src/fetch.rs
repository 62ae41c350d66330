//! Granule and time-series retrieval commands.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;
use tracing::{error, info};

use emit_granule::{
    BoundingBox, CmrSearch, GranuleRetriever, GranuleSearch, HttpTransport, HttpTransportConfig,
    RetrieverConfig,
};

/// Retrieval flags shared by the granule and timeseries subcommands.
#[derive(Args, Debug)]
pub struct RetrievalOpts {
    /// Directory granules are cached under
    #[arg(long, env = "EMIT_DOWNLOAD_DIR", default_value = "emit_downloads")]
    pub download_dir: PathBuf,

    /// Maximum download attempts per granule
    #[arg(long, default_value = "3")]
    pub max_retries: u32,

    /// Base retry delay in seconds (doubles after each failed attempt)
    #[arg(long, default_value = "2.0")]
    pub retry_delay: f64,

    /// Skip NetCDF validation and only check file existence
    #[arg(long)]
    pub skip_validation: bool,

    /// Parallel connections for the first download attempt
    #[arg(long, default_value = "4")]
    pub threads: usize,

    /// NASA Earthdata bearer token
    #[arg(long, env = "EARTHDATA_TOKEN", hide_env_values = true)]
    pub earthdata_token: Option<String>,
}

impl RetrievalOpts {
    fn build(&self) -> Result<(GranuleRetriever, Arc<CmrSearch>)> {
        let transport = HttpTransport::new(HttpTransportConfig {
            bearer_token: self.earthdata_token.clone(),
            ..HttpTransportConfig::default()
        })
        .context("failed to build HTTP transport")?;

        let search = Arc::new(CmrSearch::new().context("failed to build CMR search client")?);

        let config = RetrieverConfig {
            download_directory: self.download_dir.clone(),
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs_f64(self.retry_delay),
            skip_validation: self.skip_validation,
            download_threads: self.threads,
            ..RetrieverConfig::default()
        };

        let retriever = GranuleRetriever::new(
            Arc::new(transport),
            search.clone() as Arc<dyn GranuleSearch>,
            config,
        );

        Ok((retriever, search))
    }
}

#[derive(Args, Debug)]
pub struct GranuleArgs {
    /// Orbit number of the overpass
    #[arg(long)]
    pub orbit: u32,

    /// Scene number within the orbit
    #[arg(long)]
    pub scene: u16,

    #[command(flatten)]
    pub retrieval: RetrievalOpts,
}

pub async fn run_granule(args: GranuleArgs) -> Result<()> {
    let (retriever, _search) = args.retrieval.build()?;

    let set = retriever
        .retrieve_by_orbit_scene(args.orbit, args.scene)
        .await?;

    info!(directory = %set.directory().display(), "granule retrieved");
    println!("{}", set.reflectance().display());
    println!("{}", set.quality_mask().display());
    println!("{}", set.uncertainty().display());

    Ok(())
}

#[derive(Args, Debug)]
pub struct TimeseriesArgs {
    /// First UTC date of the range (YYYY-MM-DD)
    #[arg(long)]
    pub start_date: NaiveDate,

    /// Last UTC date of the range, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub end_date: NaiveDate,

    /// Search area as west,south,east,north degrees
    #[arg(long)]
    pub bbox: Option<BoundingBox>,

    /// Manifest file (JSON lines) recording every retrieved granule
    #[arg(long, default_value = "emit_timeseries_manifest.jsonl")]
    pub manifest: PathBuf,

    #[command(flatten)]
    pub retrieval: RetrievalOpts,
}

pub async fn run_timeseries(args: TimeseriesArgs) -> Result<()> {
    anyhow::ensure!(
        args.start_date <= args.end_date,
        "start date {} is after end date {}",
        args.start_date,
        args.end_date
    );

    let (retriever, search) = args.retrieval.build()?;

    let mut manifest = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.manifest)
        .with_context(|| format!("cannot open manifest {}", args.manifest.display()))?;

    info!(
        start = %args.start_date,
        end = %args.end_date,
        "generating EMIT L2A RFL timeseries"
    );

    let mut retrieved = 0usize;
    let mut failed = 0usize;

    let mut date = args.start_date;
    while date <= args.end_date {
        info!(date = %date, "processing date");

        let granules = search.granules_for_date(date, args.bbox).await?;
        if granules.is_empty() {
            info!(date = %date, "no granules available");
            date = date.succ_opt().context("date out of range")?;
            continue;
        }

        info!(date = %date, count = granules.len(), "found granules");

        for remote in &granules {
            match retriever.retrieve(remote).await {
                Ok(set) => {
                    retrieved += 1;
                    let record = serde_json::json!({
                        "date": date.to_string(),
                        "granule": remote.name,
                        "reflectance": set.reflectance(),
                        "quality_mask": set.quality_mask(),
                        "uncertainty": set.uncertainty(),
                    });
                    writeln!(manifest, "{}", record)
                        .with_context(|| format!("cannot write {}", args.manifest.display()))?;
                }
                Err(err) => {
                    failed += 1;
                    error!(granule = %remote.name, error = %err, "granule retrieval failed");
                }
            }
        }

        date = date.succ_opt().context("date out of range")?;
    }

    info!(retrieved, failed, manifest = %args.manifest.display(), "timeseries complete");

    if failed > 0 {
        anyhow::bail!("{} granule(s) failed to retrieve", failed);
    }

    Ok(())
}
