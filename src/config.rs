//! Engine-wide configuration.
//!
//! A single [`Config`] value is constructed once (from CLI flags, see
//! [`crate::cli`]) and passed explicitly into the rate gate, HTTP client,
//! discovery engine and download engine. Nothing in this crate reaches for
//! global mutable state to read a tunable.

use std::path::PathBuf;

/// File types the download engine will fetch per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Pdf,
    Jp2,
    Ocr,
    Metadata,
}

impl FileType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Jp2 => "jp2",
            Self::Ocr => "ocr",
            Self::Metadata => "metadata",
        }
    }

    #[must_use]
    pub fn all() -> [FileType; 4] {
        [Self::Pdf, Self::Jp2, Self::Ocr, Self::Metadata]
    }
}

impl std::str::FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "jp2" => Ok(Self::Jp2),
            "ocr" => Ok(Self::Ocr),
            "metadata" => Ok(Self::Metadata),
            other => Err(format!("unknown file type '{other}' (expected pdf, jp2, ocr, metadata)")),
        }
    }
}

/// Tunables for the rate gate.
#[derive(Debug, Clone)]
pub struct RateGateConfig {
    /// Maximum requests permitted in any trailing 60-second window.
    pub max_per_minute: u32,
    /// Base cooldown duration applied on the first CAPTCHA of a streak.
    pub base_cooldown_secs: u64,
}

impl Default for RateGateConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 12,
            base_cooldown_secs: 3600,
        }
    }
}

/// Tunables for the HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub read_timeout_metadata_secs: u64,
    pub read_timeout_file_secs: u64,
    pub max_retries: u32,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://chroniclingamerica.loc.gov".to_string(),
            read_timeout_metadata_secs: 60,
            read_timeout_file_secs: 120,
            max_retries: 3,
        }
    }
}

/// Tunables for the download engine.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub download_root: PathBuf,
    pub file_types: Vec<FileType>,
    pub per_page_concurrency: usize,
    pub batch_size: usize,
    pub flush_every: usize,
    pub poll_interval_secs: u64,
    pub max_idle_minutes: u64,
    pub route_binaries_through_rate_gate: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_root: PathBuf::from("./downloads"),
            file_types: FileType::all().to_vec(),
            per_page_concurrency: 6,
            batch_size: 50,
            flush_every: 10,
            poll_interval_secs: 30,
            max_idle_minutes: 10,
            route_binaries_through_rate_gate: false,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub rate_gate: RateGateConfig,
    pub http_client: HttpClientConfig,
    pub download: DownloadConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./harvester.db"),
            rate_gate: RateGateConfig::default(),
            http_client: HttpClientConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_default_config_matches_spec_numbers() {
        let config = Config::default();
        assert_eq!(config.rate_gate.max_per_minute, 12);
        assert_eq!(config.download.per_page_concurrency, 6);
        assert_eq!(config.download.batch_size, 50);
        assert_eq!(config.download.flush_every, 10);
    }

    #[test]
    fn test_file_type_round_trip() {
        for ft in FileType::all() {
            let parsed = FileType::from_str(ft.as_str()).unwrap();
            assert_eq!(parsed.as_str(), ft.as_str());
        }
    }

    #[test]
    fn test_file_type_rejects_unknown() {
        assert!(FileType::from_str("epub").is_err());
    }
}
