use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::annotate::{AnnotationProcessor, DatatypeRenamer, HopProcessor};
use crate::jobs::JobClient;
use crate::process::worker::IDLE_WAIT;
use crate::process::{run_worker, Copier, DateProcessor, Manager, Processor};
use crate::query::{self, BigQueryRest, Querier};
use crate::server::{create_router, run_saver, AppState};
use crate::storage::{ObjectClient, StoreClient};

/// Archive repacker - date-batched reprocessing of archived measurement data
#[derive(Parser, Debug)]
#[command(
    name = "repacker",
    version,
    about = "Archive repacker - date-batched reprocessing of archived measurement data"
)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the job server that hands out dates to workers
    JobServer {
        /// Listen on the given address
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,

        /// File where job state is periodically written
        #[arg(long)]
        output: PathBuf,

        /// Seconds a leased job may go without updates before being retried
        #[arg(long, default_value_t = 7200)]
        timeout: u64,

        /// Seconds between state saves
        #[arg(long = "save-period", default_value_t = 5)]
        save_period: u64,
    },

    /// Run a reannotation worker against the job server
    Reannotate {
        /// The URL for the job service providing dates to process
        #[arg(long = "jobservice-url")]
        jobservice_url: String,

        /// GCP project name
        #[arg(long)]
        project: String,

        /// Write generated archives to this bucket
        #[arg(long = "output")]
        output_bucket: String,

        /// File with the query that generates the archive list
        #[arg(long = "query")]
        query_file: PathBuf,

        /// URL prefix of the RouteViewIPv4 ASN datasets (gs:// or file://)
        #[arg(long = "routeview-v4-url")]
        routeview_v4: String,

        /// URL prefix of the RouteViewIPv6 ASN datasets (gs:// or file://)
        #[arg(long = "routeview-v6-url")]
        routeview_v6: String,

        /// URL of the AS number to AS name CSV
        #[arg(long = "asname-url")]
        asname_url: String,

        /// Name of the original datatype to read in
        #[arg(long = "from-datatype", default_value = "annotation")]
        from_datatype: String,

        /// Name of the new datatype to write out
        #[arg(long = "new-datatype", default_value = "annotation2")]
        new_datatype: String,

        /// Milliseconds to wait between query row reads
        #[arg(long = "bq-delay-ms", default_value_t = 1)]
        bq_delay_ms: u64,

        /// Process hop annotation archives instead of annotation archives
        #[arg(long)]
        hops: bool,
    },

    /// Run a bulk-rename worker that copies archives to a new datatype
    Rename {
        /// The URL for the job service providing dates to process
        #[arg(long = "jobservice-url")]
        jobservice_url: Option<String>,

        /// Write renamed archives to this bucket
        #[arg(long = "output")]
        output_bucket: String,

        /// Name of the experiment
        #[arg(long, default_value = "ndt")]
        experiment: String,

        /// Name of the original datatype to read in
        #[arg(long = "from-datatype", default_value = "annotation")]
        from_datatype: String,

        /// Name of the new datatype to write out
        #[arg(long = "new-datatype", default_value = "annotation2")]
        new_datatype: String,

        /// If provided, process only this single date
        #[arg(long)]
        date: Option<String>,
    },
}

pub async fn dispatch(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::JobServer {
            addr,
            output,
            timeout,
            save_period,
        } => {
            let state = Arc::new(AppState::new(output.clone(), Duration::from_secs(*timeout)));
            state.load().await.context("failed to load saved jobs data")?;
            tokio::spawn(run_saver(
                Arc::clone(&state),
                Duration::from_secs(*save_period),
            ));

            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to listen on {}", addr))?;
            tracing::info!("job server listening on {}", addr);
            axum::serve(listener, create_router(state))
                .await
                .context("job server exited")?;
            Ok(())
        }

        Commands::Reannotate {
            jobservice_url,
            project,
            output_bucket,
            query_file,
            routeview_v4,
            routeview_v6,
            asname_url,
            from_datatype,
            new_datatype,
            bq_delay_ms,
            hops,
        } => {
            let store: Arc<dyn ObjectClient> = Arc::new(StoreClient::new());
            let jobs = JobClient::new(jobservice_url);
            let query = std::fs::read_to_string(query_file)
                .with_context(|| format!("reading query file {}", query_file.display()))?;

            // Many workers collecting rows in parallel can exceed the
            // aggregate read quota; pace each one.
            query::set_row_delay(Duration::from_millis(*bq_delay_ms));

            let token = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN")
                .context("GOOGLE_OAUTH_ACCESS_TOKEN must be set for query access")?;
            let querier: Arc<dyn Querier> = Arc::new(BigQueryRest::new(project, &token));

            if *hops {
                let processor = HopProcessor::new(
                    Arc::clone(&store),
                    output_bucket,
                    routeview_v4,
                    routeview_v6,
                    asname_url,
                );
                run_manager(jobs, processor, querier, query).await
            } else {
                let processor = AnnotationProcessor::new(
                    Arc::clone(&store),
                    output_bucket,
                    routeview_v4,
                    routeview_v6,
                    asname_url,
                    from_datatype,
                    new_datatype,
                );
                run_manager(jobs, processor, querier, query).await
            }
        }

        Commands::Rename {
            jobservice_url,
            output_bucket,
            experiment,
            from_datatype,
            new_datatype,
            date,
        } => {
            let store: Arc<dyn ObjectClient> = Arc::new(StoreClient::new());
            let renamer = Arc::new(DatatypeRenamer::new(
                store,
                output_bucket,
                experiment,
                from_datatype,
                new_datatype,
            ));

            if let Some(date) = date {
                let mut copier = Copier::new(None, renamer);
                return DateProcessor::process_date(&mut copier, date).await;
            }

            let url = jobservice_url
                .as_deref()
                .context("--jobservice-url is required without --date")?;
            let jobs = JobClient::new(url);
            let mut copier = Copier::new(Some(jobs.clone()), renamer);
            run_worker(&jobs, &mut copier, IDLE_WAIT).await
        }
    }
}

async fn run_manager<P: Processor + Sync>(
    jobs: JobClient,
    processor: P,
    querier: Arc<dyn Querier>,
    query: String,
) -> Result<()> {
    let mut manager = Manager::new(Some(jobs.clone()), processor, querier, query);
    run_worker(&jobs, &mut manager, IDLE_WAIT).await
}

// ===========================================================================
// Tests
// ===========================================================================
