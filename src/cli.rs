use crate::{build, http};
use anyhow::{Error, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity, log::LevelFilter};
use std::{io, path::PathBuf, time::Duration};
use tracing_subscriber::filter::LevelFilter as TFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

static DEFAULT_CASINOS_URL: &str =
    "https://consultasenlinea.mincetur.gob.pe/webCasinos/Index.aspx?po=frmSalas.aspx";

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Normal,
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(
    author,
    version,
    long_version = build::CLAP_LONG_VERSION,
    about,
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Log level verbosity
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Which log formatter to use
    // env will pick up the value if the field name is given as the key in uppercase
    #[arg(short = 'f', long, env, default_value_t, value_enum)]
    pub log_format: LogFormat,

    /// Registry page listing the licensed halls
    #[arg(long, env = "CASINOS_URL", default_value = DEFAULT_CASINOS_URL)]
    pub casinos_url: Url,

    /// Search page for resolution documents
    #[arg(long, env = "CASINOS_PDF_URL")]
    pub pdf_url: Option<Url>,

    #[command(flatten)]
    pub http: HttpArgs,

    #[command(flatten)]
    pub mongo: MongoArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Pipeline to run
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Args)]
pub struct HttpArgs {
    /// Timeout for a single request
    #[arg(long, env, default_value = "60s", value_parser = humantime::parse_duration)]
    pub request_timeout: Duration,

    /// Base delay between requests, a random jitter is added on top
    #[arg(long, env, default_value = "1s", value_parser = humantime::parse_duration)]
    pub request_delay: Duration,

    /// How long to wait for the registry table to show up
    #[arg(long, env, default_value = "60s", value_parser = humantime::parse_duration)]
    pub table_wait: Duration,

    /// Extra attempts per resolution, each with a fresh search session
    #[arg(long, env, default_value_t = 1)]
    pub retries: usize,
}

impl HttpArgs {
    pub fn client_opts(&self) -> http::Opts {
        http::Opts {
            request_delay: self.request_delay,
            request_timeout: self.request_timeout,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct MongoArgs {
    /// MongoDB connection string
    #[arg(long, env = "MONGO_URL", hide_env_values = true)]
    pub mongo_url: Option<String>,

    #[arg(long, env = "MONGO_DB", default_value = "data_casinos")]
    pub mongo_db: String,

    /// Collection holding the scraped registry
    #[arg(long, env = "COLLECTION_LOAD", default_value = "load_casinos")]
    pub collection_load: String,

    /// Collection holding attachment results per resolution
    #[arg(long, env = "COLLECTION_PDF", default_value = "pdf_casinos")]
    pub collection_pdf: String,
}

#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    /// Where the CSV and spreadsheet files go
    #[arg(long, env = "PROCESSED_PATH", default_value = "data/processed")]
    pub processed_path: PathBuf,

    /// Where downloaded documents go
    #[arg(long, env = "DOWNLOAD_PATH", default_value = "data/downloads")]
    pub download_path: PathBuf,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RegistryArgs {
    /// Don't touch the database, only write files
    #[arg(long)]
    pub no_db: bool,

    /// Stop after this many pages
    #[arg(long, env = "MAX_PAGES")]
    pub max_pages: Option<usize>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ResolutionArgs {
    /// Read records from a registry CSV instead of the database
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Skip resolutions that already have stored documents
    #[arg(long)]
    pub resume: bool,

    /// Don't touch the database
    #[arg(long)]
    pub no_db: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Scrape the hall registry and load it into the database
    Registry(RegistryArgs),
    /// Search and download resolution documents for the loaded records
    Resolutions(ResolutionArgs),
    /// Registry, then resolutions
    All {
        #[command(flatten)]
        registry: RegistryArgs,

        /// Skip resolutions that already have stored documents
        #[arg(long)]
        resume: bool,
    },
}

impl Cli {
    /// Wrapper for clap::Parser::try_parse_from
    pub fn try_parse_opts<I, T>(itr: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(itr).map_err(Error::from)
    }

    // this thin wrapper makes it possible to do the parsing without importing clap::Parser at the
    // call site
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Maps clap_verbosity_flag::LevelFilter values to tracing_subscriber::filter::LevelFilter
    /// values
    fn tracing_level_filter(&self) -> TFilter {
        match self.verbosity.log_level_filter() {
            LevelFilter::Off => TFilter::OFF,
            LevelFilter::Error => TFilter::ERROR,
            LevelFilter::Warn => TFilter::WARN,
            LevelFilter::Info => TFilter::INFO,
            LevelFilter::Debug => TFilter::DEBUG,
            LevelFilter::Trace => TFilter::TRACE,
        }
    }

    pub fn init_logger(&self) -> Result<()> {
        let layer = match self.log_format {
            LogFormat::Json => fmt::layer().json().with_writer(io::stderr).boxed(),
            LogFormat::Pretty => fmt::layer().pretty().with_writer(io::stderr).boxed(),
            LogFormat::Compact => fmt::layer()
                .without_time()
                .compact()
                .with_writer(io::stderr)
                .boxed(),
            LogFormat::Normal => fmt::layer().with_writer(io::stderr).boxed(),
        };
        tracing_subscriber::registry()
            .with(
                EnvFilter::builder()
                    .with_default_directive(self.tracing_level_filter().into())
                    .from_env()?,
            )
            .with(layer)
            .init();
        Ok(())
    }
}
