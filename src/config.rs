use serde::{Deserialize, Serialize};
use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

use crate::credential::provider::GOOGLE_TOKEN_URL;

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level board configuration. Every widget section is optional; an
/// absent section means defaults, and a missing API key only disables that
/// one widget at fetch time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub log_level: Option<String>,     // e.g., "info" | "debug"
    pub weather: Option<WeatherConfig>,
    pub rail: Option<RailConfig>,
    pub headlines: Option<HeadlinesConfig>,
    pub photos: Option<PhotosConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub units: String,              // "metric" | "imperial"
    pub base_url: String,
    pub interval_secs: u64,
    pub forecast_interval_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            lat: None,
            lon: None,
            units: "metric".to_string(),
            base_url: "https://api.openweathermap.org/data/3.0/onecall".to_string(),
            interval_secs: 300,
            forecast_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RailConfig {
    pub api_key: Option<String>,
    pub station: Option<String>,        // CRS code, e.g. "HGR"
    pub destinations: Vec<String>,      // case-insensitive substrings
    pub destination_label: String,      // used in "No <label>-bound trains found"
    pub rows: u32,
    pub time_window: u32,               // minutes
    pub base_url: String,
    pub interval_secs: u64,
}

impl Default for RailConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            station: None,
            destinations: ["london", "charing cross", "cannon", "bridge"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            destination_label: "London".to_string(),
            rows: 10,
            time_window: 120,
            base_url: "https://api1.raildata.org.uk/1010-live-departure-board-dep1_2/LDBWS/api/20220120/GetDepartureBoard".to_string(),
            interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlinesConfig {
    pub api_key: Option<String>,
    pub country: String,
    pub limit: usize,
    pub base_url: String,
    pub interval_secs: u64,
}

impl Default for HeadlinesConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            country: "gb".to_string(),
            limit: 5,
            base_url: "https://newsapi.org/v2/top-headlines".to_string(),
            interval_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotosConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub token_url: String,
    pub api_base_url: String,
    pub page_size: u32,
    pub window_size: usize,
    pub rotate_secs: u64,
    pub interval_secs: u64,
    pub renew_before_expiry_secs: u64,
    pub credential_path: Option<PathBuf>,
    pub auto_sign_in: bool,
}

impl Default for PhotosConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            refresh_token: None,
            token_url: GOOGLE_TOKEN_URL.to_string(),
            api_base_url: "https://photoslibrary.googleapis.com/v1/mediaItems".to_string(),
            page_size: 20,
            window_size: 4,
            rotate_secs: 10,
            interval_secs: 30 * 60,
            renew_before_expiry_secs: 5 * 60,
            credential_path: None,
            auto_sign_in: true,
        }
    }
}

impl Config {
    pub fn weather(&self) -> WeatherConfig {
        self.weather.clone().unwrap_or_default()
    }

    pub fn rail(&self) -> RailConfig {
        self.rail.clone().unwrap_or_default()
    }

    pub fn headlines(&self) -> HeadlinesConfig {
        self.headlines.clone().unwrap_or_default()
    }

    pub fn photos(&self) -> PhotosConfig {
        self.photos.clone().unwrap_or_default()
    }
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "wallboard", about = "Wall display data core", version)]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// Enable debug log level
    #[arg(long, short = 'v', alias = "verbose", action = ArgAction::SetTrue)]
    pub debug: bool,
    #[arg(long)]
    pub weather_lat: Option<f64>,
    #[arg(long)]
    pub weather_lon: Option<f64>,
    /// Rail station CRS code
    #[arg(long)]
    pub station: Option<String>,
    /// Where the photo credential is persisted
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub credential_path: Option<PathBuf>,
    /// Do not sign in to the photo library automatically
    #[arg(long, action = ArgAction::SetTrue)]
    pub no_sign_in: bool,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Public entry point: parse CLI, read YAML, merge, validate.
pub fn load() -> Result<Config, ConfigError> {
    let cli = Cli::parse();
    let cfg = load_with(&cli)?;

    if cli.dump_config {
        // Pretty YAML of effective config (nice for debugging)
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    Ok(cfg)
}

/// Layer defaults, YAML and `cli`, then validate.
pub fn load_with(cli: &Cli) -> Result<Config, ConfigError> {
    // 1) defaults (from `Default` impl)
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    // 3) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli);

    // 4) Validate
    validate(&cfg)?;
    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/wallboard/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/wallboard/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/wallboard.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["wallboard.yaml", "config.yaml", "config/wallboard.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

/// Shallow merge `src` into `dst`, section by section.
fn merge(dst: &mut Config, src: Config) {
    if src.log_level.is_some()  { dst.log_level = src.log_level; }
    if src.weather.is_some()    { dst.weather = src.weather; }
    if src.rail.is_some()       { dst.rail = src.rail; }
    if src.headlines.is_some()  { dst.headlines = src.headlines; }
    if src.photos.is_some()     { dst.photos = src.photos; }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some()       { cfg.log_level = cli.log_level.clone(); }
    if cli.debug                     { cfg.log_level = Some("debug".to_string()); }

    if cli.weather_lat.is_some() || cli.weather_lon.is_some() {
        let weather = cfg.weather.get_or_insert_with(WeatherConfig::default);
        if cli.weather_lat.is_some() { weather.lat = cli.weather_lat; }
        if cli.weather_lon.is_some() { weather.lon = cli.weather_lon; }
    }
    if cli.station.is_some() {
        cfg.rail.get_or_insert_with(RailConfig::default).station = cli.station.clone();
    }
    if cli.credential_path.is_some() || cli.no_sign_in {
        let photos = cfg.photos.get_or_insert_with(PhotosConfig::default);
        if cli.credential_path.is_some() { photos.credential_path = cli.credential_path.clone(); }
        if cli.no_sign_in                { photos.auto_sign_in = false; }
    }
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let weather = cfg.weather();
    if weather.interval_secs == 0 || weather.forecast_interval_secs == 0 {
        return Err(ConfigError::Validation("weather intervals must be > 0".into()));
    }
    if let Some(lat) = weather.lat {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(ConfigError::Validation("weather lat must be within -90..=90".into()));
        }
    }
    if let Some(lon) = weather.lon {
        if !(-180.0..=180.0).contains(&lon) {
            return Err(ConfigError::Validation("weather lon must be within -180..=180".into()));
        }
    }
    match weather.units.as_str() {
        "metric" | "imperial" | "standard" => {},
        u => return Err(ConfigError::Validation(format!("weather units must be metric|imperial|standard, got {u}"))),
    }
    if cfg.rail().interval_secs == 0 {
        return Err(ConfigError::Validation("rail interval_secs must be > 0".into()));
    }
    if cfg.headlines().interval_secs == 0 {
        return Err(ConfigError::Validation("headlines interval_secs must be > 0".into()));
    }
    let photos = cfg.photos();
    if photos.interval_secs == 0 || photos.rotate_secs == 0 {
        return Err(ConfigError::Validation("photos interval_secs/rotate_secs must be > 0".into()));
    }
    if photos.window_size == 0 {
        return Err(ConfigError::Validation("photos window_size must be > 0".into()));
    }
    if !(1..=100).contains(&photos.page_size) {
        return Err(ConfigError::Validation("photos page_size must be 1..=100".into()));
    }
    Ok(())
}
