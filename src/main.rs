use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tcga_cohort_loader::runner::{
    self, DEFAULT_COHORTS, DEFAULT_DATASET_LINK, DEFAULT_DOWNLOADS_DIR, DEFAULT_HUB_URL,
    DEFAULT_SECRETS_FILE, DEFAULT_SURVIVAL_SOURCE, DEFAULT_WEBDRIVER_URL, EnrichArgs, EnrichResult,
    LoadArgs, LoadResult, PANCAN_SUFFIX, PipelineArgs, ScrapeArgs, ScrapeResult, ServeArgs,
    Settings, TARGET_GENES, UploadArgs, UploadResult,
};

#[derive(Parser, Clone)]
#[command(version, about)]
struct Args {
    /// Secrets file with object-store and database settings
    #[arg(long, global = true, env = "TCGA_LOADER_SECRETS", default_value = DEFAULT_SECRETS_FILE)]
    secrets: PathBuf,

    /// Quiet mode - minimal output, only show summary
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Keep objects in this directory instead of S3 (upload and load)
    #[arg(long, global = true, env = "TCGA_LOADER_STORE_DIR")]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Download cohort expression files from the hub
    Scrape {
        #[command(flatten)]
        scrape: ScrapeOpts,
    },
    /// Copy downloaded expression files into the bucket
    Upload {
        /// Directory searched recursively for files to upload
        #[arg(long, default_value = DEFAULT_DOWNLOADS_DIR)]
        source_dir: PathBuf,

        /// Only files whose name ends with this are uploaded
        #[arg(long, default_value = PANCAN_SUFFIX)]
        suffix: String,

        /// List what would be uploaded without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Turn expression matrices in the bucket into patient documents
    Load {
        #[command(flatten)]
        load: LoadOpts,

        /// Only objects whose key ends with this are loaded
        #[arg(long, default_value = PANCAN_SUFFIX)]
        suffix: String,
    },
    /// Fill survival and clinical stage from the clinical table
    Enrich {
        #[command(flatten)]
        enrich: EnrichOpts,
    },
    /// Serve patient lookups over HTTP
    Serve {
        #[arg(long, env = "SERVER_HOST")]
        host: Option<String>,

        /// Unparseable values fall back to 5555
        #[arg(long, env = "SERVER_PORT")]
        port: Option<String>,
    },
    /// Scrape, upload, load and enrich in order
    Pipeline {
        #[command(flatten)]
        scrape: ScrapeOpts,

        #[command(flatten)]
        load: LoadOpts,

        #[command(flatten)]
        enrich: EnrichOpts,

        /// File and object suffix of expression matrices
        #[arg(long, default_value = PANCAN_SUFFIX)]
        suffix: String,
    },
}

#[derive(clap::Args, Clone)]
struct ScrapeOpts {
    /// Cohort hub page
    #[arg(long, default_value = DEFAULT_HUB_URL)]
    hub_url: String,

    /// WebDriver (chromedriver) server
    #[arg(long, env = "WEBDRIVER_URL", default_value = DEFAULT_WEBDRIVER_URL)]
    webdriver_url: String,

    /// Folder receiving downloads
    #[arg(long, default_value = DEFAULT_DOWNLOADS_DIR)]
    downloads: PathBuf,

    /// Cohort link text to click (repeatable)
    #[arg(long = "cohort")]
    cohorts: Vec<String>,

    /// Partial text of the dataset link inside a cohort page
    #[arg(long, default_value = DEFAULT_DATASET_LINK)]
    dataset_link: String,

    /// Stop after this many downloads (0 means no limit)
    #[arg(long)]
    max_downloads: Option<usize>,

    /// Parse the hub page for cohorts instead of clicking cohort links
    #[arg(long)]
    discover: bool,
}

#[derive(clap::Args, Clone)]
struct LoadOpts {
    /// Number of workers
    #[arg(short, long, default_value = "8")]
    workers: usize,

    /// Documents per insert
    #[arg(short, long, default_value = "2000")]
    batch_size: usize,

    /// Comma-separated target genes (default: the built-in gene panel)
    #[arg(long)]
    genes: Option<String>,

    /// Delete a cohort's documents before loading it again
    #[arg(long)]
    replace: bool,
}

#[derive(clap::Args, Clone)]
struct EnrichOpts {
    /// Survival table: local path, file:// URI or s3://bucket/key
    #[arg(long, default_value = DEFAULT_SURVIVAL_SOURCE)]
    survival: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.quiet);

    match args.command.clone() {
        Command::Scrape { scrape } => {
            let result = runner::run_scrape(scrape_args(scrape)).await?;
            print_scrape_summary(&result);
        }
        Command::Upload {
            source_dir,
            suffix,
            dry_run,
        } => {
            let settings = runner::load_settings(&args.secrets)?;
            if dry_run {
                println!("DRY RUN MODE - nothing will be uploaded");
                println!();
            }
            let result = runner::run_upload(UploadArgs {
                settings,
                source_dir,
                suffix,
                dry_run,
                store_dir: args.store_dir.clone(),
            })
            .await?;
            print_upload_summary(&result);
        }
        Command::Load { load, suffix } => {
            let settings = runner::load_settings(&args.secrets)?;
            if !args.quiet {
                println!("TCGA Cohort Loader");
                println!("==================");
                println!("Bucket: {}", settings.object_store.bucket);
                println!("Table: {}", settings.database.table);
                println!("Workers: {}", load.workers);
                println!();
            }
            let result = runner::run_load(load_args(load, suffix, settings, &args)?).await?;
            print_load_summary(&result);
        }
        Command::Enrich { enrich } => {
            let settings = runner::load_settings(&args.secrets)?;
            let result = runner::run_enrich(EnrichArgs {
                settings,
                survival_source: enrich.survival,
            })
            .await?;
            print_enrich_summary(&result);
        }
        Command::Serve { host, port } => {
            let settings = runner::load_settings(&args.secrets)?;
            runner::run_serve(ServeArgs {
                settings,
                host,
                port,
            })
            .await?;
        }
        Command::Pipeline {
            scrape,
            load,
            enrich,
            suffix,
        } => {
            let settings = runner::load_settings(&args.secrets)?;
            let scrape = scrape_args(scrape);
            let upload = UploadArgs {
                settings: settings.clone(),
                source_dir: scrape.downloads_dir.clone(),
                suffix: suffix.clone(),
                dry_run: false,
                store_dir: args.store_dir.clone(),
            };
            let load = load_args(load, suffix, settings.clone(), &args)?;
            let enrich = EnrichArgs {
                settings,
                survival_source: enrich.survival,
            };

            let result = runner::run_pipeline(PipelineArgs {
                scrape,
                upload,
                load,
                enrich,
            })
            .await?;

            print_scrape_summary(&result.scrape);
            print_upload_summary(&result.upload);
            print_load_summary(&result.load);
            print_enrich_summary(&result.enrich);
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise info for this crate, warn when quiet
fn init_tracing(quiet: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let default_filter = if quiet {
        "tcga_cohort_loader=warn,sqlx=off"
    } else {
        "tcga_cohort_loader=info,sqlx=off"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn scrape_args(opts: ScrapeOpts) -> ScrapeArgs {
    let cohort_links = if opts.cohorts.is_empty() {
        DEFAULT_COHORTS.iter().map(|c| c.to_string()).collect()
    } else {
        opts.cohorts
    };

    ScrapeArgs {
        hub_url: opts.hub_url,
        webdriver_url: opts.webdriver_url,
        downloads_dir: opts.downloads,
        cohort_links,
        dataset_link: opts.dataset_link,
        max_downloads: opts.max_downloads,
        discover: opts.discover,
    }
}

fn load_args(
    opts: LoadOpts,
    suffix: String,
    settings: Settings,
    args: &Args,
) -> anyhow::Result<LoadArgs> {
    let genes = match opts.genes {
        Some(list) => cli::parse_gene_list(&list)?,
        None => TARGET_GENES.iter().map(|g| g.to_string()).collect(),
    };

    Ok(LoadArgs {
        settings,
        worker_count: opts.workers,
        batch_size: opts.batch_size,
        suffix,
        genes,
        replace_existing: opts.replace,
        quiet: args.quiet,
        store_dir: args.store_dir.clone(),
    })
}

fn print_scrape_summary(result: &ScrapeResult) {
    println!();
    println!("Scrape Summary");
    println!("==============");
    println!("Cohorts visited: {}", result.cohorts_visited);
    println!("Files downloaded: {}", result.downloaded.len());
    println!("Files extracted: {}", result.extracted.len());
}

fn print_upload_summary(result: &UploadResult) {
    println!();
    println!("Upload Summary");
    println!("==============");
    println!("Uploaded: {}", result.uploaded);
    println!("Skipped (already present): {}", result.skipped);
    println!("Failed: {}", result.failed);
}

fn print_load_summary(result: &LoadResult) {
    println!();
    println!("Load Summary");
    println!("============");
    println!("Job ID: {}", result.job_id);
    println!("Objects loaded: {}", result.objects_processed);
    println!("Objects skipped: {}", result.objects_skipped);
    println!("Objects failed: {}", result.objects_failed);
    println!("Documents inserted: {}", result.documents_inserted);
    println!("Documents failed: {}", result.documents_failed);
    println!("Duration: {:.2}s", result.duration.as_secs_f64());
    println!(
        "Throughput: {:.2} documents/sec",
        result.documents_inserted as f64 / result.duration.as_secs_f64().max(f64::EPSILON)
    );
}

fn print_enrich_summary(result: &EnrichResult) {
    println!();
    println!("Enrich Summary");
    println!("==============");
    println!("Updated: {}/{}", result.updated, result.total);
    println!("Duration: {:.2}s", result.duration.as_secs_f64());
    println!("Throughput: {:.1} patients/sec", result.patients_per_second());
}

/// CLI utility functions for parsing command-line arguments
mod cli {
    /// Parse a comma-separated gene list, dropping blanks and duplicates
    pub fn parse_gene_list(list: &str) -> anyhow::Result<Vec<String>> {
        let mut genes: Vec<String> = Vec::new();
        for gene in list.split(',').map(str::trim).filter(|g| !g.is_empty()) {
            if !genes.iter().any(|g| g == gene) {
                genes.push(gene.to_string());
            }
        }

        if genes.is_empty() {
            return Err(anyhow::anyhow!(
                "Gene list '{}' is empty. Example: --genes \"CCL5,IL6\"",
                list
            ));
        }
        Ok(genes)
    }

}
