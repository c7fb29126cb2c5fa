use serde::{Deserialize, Serialize};
use std::{fmt, io::Read, str::FromStr, time::Duration};
use thiserror::Error;

const USER_AGENT: &str = concat!("lexiforge/", env!("CARGO_PKG_VERSION"));

/// Experience enhancement bundle, offered to `ru` release clients only.
pub const EXTRAS_URL: &str =
    "https://gitee.com/localized-korabli/Korabli-LESTA-L10N/raw/main/BuiltInMods/LKExperienceEnhancement.zip";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadSource {
    #[default]
    Gitee,
    Github,
    Local,
}

impl DownloadSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadSource::Gitee => "gitee",
            DownloadSource::Github => "github",
            DownloadSource::Local => "local",
        }
    }

    /// Base URL of the catalog route, ending in `/`. `None` for local files.
    pub fn route(self, release: bool) -> Option<&'static str> {
        match (self, release) {
            (DownloadSource::Gitee, true) => Some(
                "https://gitee.com/localized-korabli/Korabli-LESTA-L10N/raw/main/Localizations/latest/",
            ),
            (DownloadSource::Github, true) => Some(
                "https://github.com/LocalizedKorabli/Korabli-LESTA-L10N/raw/main/Localizations/latest/",
            ),
            (DownloadSource::Gitee, false) => Some(
                "https://gitee.com/localized-korabli/Korabli-LESTA-L10N-PublicTest/raw/Localizations/Localizations/latest/",
            ),
            (DownloadSource::Github, false) => Some(
                "https://github.com/LocalizedKorabli/Korabli-LESTA-L10N-PublicTest/raw/Localizations/Localizations/latest/",
            ),
            (DownloadSource::Local, _) => None,
        }
    }
}

impl fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadSource {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gitee" => Ok(DownloadSource::Gitee),
            "github" => Ok(DownloadSource::Github),
            "local" => Ok(DownloadSource::Local),
            other => Err(format!("unknown download source: {other}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url}: HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url}: {message}")]
    Transport { url: String, message: String },
    #[error("{url}: read body: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// Synchronous byte retrieval. The orchestrator only ever talks to this.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(60))
            .timeout_write(Duration::from_secs(10))
            .build();
        Self { agent }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .agent
            .get(url)
            .set("User-Agent", USER_AGENT)
            .call()
            .map_err(|err| match err {
                ureq::Error::Status(status, _) => FetchError::Status {
                    url: url.to_string(),
                    status,
                },
                ureq::Error::Transport(transport) => FetchError::Transport {
                    url: url.to_string(),
                    message: transport.to_string(),
                },
            })?;
        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|source| FetchError::Body {
                url: url.to_string(),
                source,
            })?;
        Ok(body)
    }
}
