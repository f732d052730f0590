// Download-only client for the storage JSON API, used to fetch policy
// files addressed as `gs://bucket/object`.

use secrecy::SecretString;
use tracing::debug;
use url::Url;

use crate::compute::{normalize_base_url, parse_error};
use crate::retry::{RetryConfig, retry_transient};
use crate::transport::TransportConfig;
use crate::Error;

/// Default REST root for the storage API.
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com/";

const GCS_SCHEME: &str = "gs://";

/// Returns `true` for `gs://` locations.
pub fn is_gcs_path(location: &str) -> bool {
    location.starts_with(GCS_SCHEME)
}

/// Split `gs://bucket/path/to/object` into `("bucket", "path/to/object")`.
pub fn parse_gcs_path(location: &str) -> Result<(&str, &str), Error> {
    let rest = location
        .strip_prefix(GCS_SCHEME)
        .ok_or_else(|| Error::InvalidStoragePath(location.to_owned()))?;
    match rest.split_once('/') {
        Some((bucket, object)) if !bucket.is_empty() && !object.is_empty() => {
            Ok((bucket, object))
        }
        _ => Err(Error::InvalidStoragePath(location.to_owned())),
    }
}

pub struct StorageClient {
    http: reqwest::Client,
    base_url: Url,
    retry: RetryConfig,
}

impl StorageClient {
    pub fn new(
        base_url: &str,
        token: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client(token)?;
        Self::from_reqwest(base_url, http)
    }

    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// `{base}/storage/v1/b/{bucket}/o/{object}?alt=media`, with the object
    /// name encoded as a single path segment.
    fn media_url(&self, bucket: &str, object: &str) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidStoragePath(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", bucket, "o", object]);
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }

    /// Fetch the object at `location` (`gs://bucket/object`) as text.
    pub async fn download_text(&self, location: &str) -> Result<String, Error> {
        let (bucket, object) = parse_gcs_path(location)?;
        let url = &self.media_url(bucket, object)?;

        retry_transient(&self.retry, location, || async move {
            debug!("GET {url}");
            let resp = self.http.get(url.clone()).send().await?;
            let status = resp.status();
            if status.is_success() {
                Ok(resp.text().await?)
            } else {
                Err(parse_error(status, resp).await)
            }
        })
        .await
    }
}
