use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Explicitly constructed handle to the job source / result sink, passed
/// down instead of living in process-wide state.
pub struct ApiClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobMeta {
    pub file_type: String,
    pub file_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    document: JobMeta,
}

#[derive(Debug, Deserialize)]
struct NextJob {
    id: Option<u64>,
}

/// Iterator over next-available job identifiers, pacing each request so the
/// producer never hammers the job source.
pub struct JobFeed<'a> {
    client: &'a ApiClient,
    next_pk: Option<u64>,
    remaining: usize,
    pace: Duration,
    first: bool,
}

impl Iterator for JobFeed<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        if !self.first && !self.pace.is_zero() {
            std::thread::sleep(self.pace);
        }
        self.first = false;

        match self.client.next_job(self.next_pk) {
            Ok(Some(doc_id)) => {
                self.next_pk = Some(doc_id + 1);
                Some(doc_id)
            }
            Ok(None) => None,
            Err(err) => {
                warn!("job feed stopped: {err:#}");
                None
            }
        }
    }
}

impl ApiClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let token = std::env::var(&cfg.api.token_env)
            .with_context(|| format!("reading token from ${}", cfg.api.token_env))?;

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .with_context(|| "building auth header")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.api.request_timeout_seconds))
            .build()
            .with_context(|| "building HTTP client")?;

        Ok(Self {
            http,
            base_url: cfg.api.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn fetch_job(&self, doc_id: u64) -> Result<JobMeta> {
        let url = format!("{}/api/v1/seller/admin/product-list/{doc_id}/", self.base_url);
        let envelope: JobEnvelope = self
            .http
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("fetching job metadata for doc_id={doc_id}"))?
            .json()
            .with_context(|| "decoding job metadata")?;
        Ok(envelope.document)
    }

    /// Next available job identifier at or after `start`. `None` once the
    /// source is exhausted.
    pub fn next_job(&self, start: Option<u64>) -> Result<Option<u64>> {
        let mut url = format!("{}/api/v1/seller/moderation-change/?type=true", self.base_url);
        if let Some(pk) = start {
            url.push_str(&format!("&pk={pk}"));
        }
        let response = self
            .http
            .get(&url)
            .send()
            .with_context(|| "enumerating next job")?;
        if !response.status().is_success() {
            warn!("next-job request returned {}", response.status());
            return Ok(None);
        }
        let next: NextJob = response.json().with_context(|| "decoding next job id")?;
        Ok(next.id)
    }

    /// Paced enumeration of next-available job identifiers, one request at a
    /// time, starting at `start` and capped at `limit` ids.
    pub fn feed(&self, start: Option<u64>, limit: usize, pace: Duration) -> JobFeed<'_> {
        JobFeed {
            client: self,
            next_pk: start,
            remaining: limit,
            pace,
            first: true,
        }
    }

    /// Streamed download so multi-hundred-megabyte decks never sit in memory.
    pub fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self
            .http
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("downloading {url}"))?;
        let mut file = std::fs::File::create(dest)
            .with_context(|| format!("creating {}", dest.display()))?;
        let bytes = response
            .copy_to(&mut file)
            .with_context(|| "writing download to disk")?;
        debug!("downloaded {bytes} bytes to {}", dest.display());
        Ok(bytes)
    }

    /// Submit result images plus the page count for a job.
    pub fn upload(&self, doc_id: u64, images: &[PathBuf], page_count: u32) -> Result<()> {
        let mut form = Form::new().text("page_count", page_count.to_string());
        for path in images {
            let part = Part::file(path)
                .with_context(|| format!("attaching {}", path.display()))?
                .mime_str("image/jpeg")
                .with_context(|| "setting image mime type")?;
            form = form.part("images", part);
        }

        let url = format!("{}/api/v1/seller/admin/product-list/{doc_id}/", self.base_url);
        let response = self
            .http
            .patch(&url)
            .multipart(form)
            .send()
            .with_context(|| format!("uploading results for doc_id={doc_id}"))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "upload for doc_id={doc_id} returned {}",
                response.status()
            ));
        }
        Ok(())
    }
}
