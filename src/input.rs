//! Provides a means to read, parse and hold configuration options for runs.
use clap::Parser;
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 11434;
const DEFAULT_MAX_RATE: u32 = 10_000;
const DEFAULT_CONCURRENCY: usize = 1_000;
const DEFAULT_TIMEOUT_MS: u32 = 1_500;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "llamascan",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
/// Sweeps an address range for a TCP port with masscan and probes every hit
/// for an exposed Ollama API, streaming confirmed instances as it goes.
/// WARNING Only point this at ranges you are authorized to scan.
pub struct Opts {
    /// Target range to sweep, in any syntax masscan accepts. Example: 10.0.0.0/8
    #[arg(short, long)]
    pub range: Option<String>,

    /// Destination TCP port to sweep for.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum packet rate masscan may transmit at, in packets per second.
    #[arg(short, long, default_value_t = DEFAULT_MAX_RATE)]
    pub max_rate: u32,

    /// Stop after this many hosts have been discovered.
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Exclusion list handed to masscan untouched.
    #[arg(short, long, default_value = "exclude.conf")]
    pub exclude_file: PathBuf,

    /// Maximum number of HTTP probes allowed in flight at once. Keep this
    /// below your open file limit.
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// The timeout in milliseconds before a probe request is abandoned.
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout: u32,

    /// Leave masscan running when the result limit is reached instead of
    /// killing it.
    #[arg(long)]
    pub keep_scanner: bool,

    /// Greppable mode. Print one JSON object per confirmed instance and
    /// nothing else. Useful for piping into jq or a file.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen
    /// readers.
    #[arg(long)]
    pub accessible: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(long, value_parser)]
    pub config_path: Option<PathBuf>,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Opts::parse()
    }

    /// Merge values found within the user configuration file into the
    /// command line arguments.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            port,
            max_rate,
            exclude_file,
            concurrency,
            timeout,
            keep_scanner,
            greppable,
            accessible
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(range, limit);
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            range: None,
            port: DEFAULT_PORT,
            max_rate: DEFAULT_MAX_RATE,
            limit: None,
            exclude_file: PathBuf::from("exclude.conf"),
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT_MS,
            keep_scanner: false,
            greppable: false,
            accessible: false,
            no_config: true,
            config_path: None,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Deserialize)]
pub struct Config {
    range: Option<String>,
    port: Option<u16>,
    max_rate: Option<u32>,
    limit: Option<usize>,
    exclude_file: Option<PathBuf>,
    concurrency: Option<usize>,
    timeout: Option<u32>,
    keep_scanner: Option<bool>,
    greppable: Option<bool>,
    accessible: Option<bool>,
}

#[cfg(not(tarpaulin_include))]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct.
    ///
    /// # Format
    ///
    /// range = "10.0.0.0/8"
    /// port = 11434
    /// max_rate = 10000
    /// concurrency = 500
    /// greppable = true
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Self {
        let mut content = String::new();
        let config_path = custom_config_path.unwrap_or_else(default_config_path);
        if config_path.exists() {
            content = fs::read_to_string(config_path).unwrap_or_default();
        }

        let config: Config = match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                println!("Found {e} in configuration file.\nAborting scan.\n");
                std::process::exit(1);
            }
        };

        config
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> PathBuf {
    let Some(mut config_path) = dirs::home_dir() else {
        panic!("Could not infer config file path.");
    };
    config_path.push(".llamascan.toml");
    config_path
}
