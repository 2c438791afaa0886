use reqwest::StatusCode;

use crate::errors::RepackerError;

/// Client for the job-server's lease/update/complete protocol.
#[derive(Debug, Clone)]
pub struct JobClient {
    base: String,
    http: reqwest::Client,
}

impl JobClient {
    /// Create a new job client for the given server base URL, e.g.
    /// "http://job-server:8080".
    pub fn new(server: &str) -> JobClient {
        JobClient {
            base: server.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Attempt to claim a new job, returning the leased date on success.
    ///
    /// Returns `RepackerError::Wait` if more jobs may become available
    /// later (the caller should retry after a delay), and
    /// `RepackerError::Empty` when the work set is fully drained.
    pub async fn lease(&self) -> Result<String, RepackerError> {
        let url = format!("{}/v1/lease", self.base);
        let resp = self.http.get(&url).send().await?;
        match resp.status() {
            StatusCode::NO_CONTENT => Err(RepackerError::Empty),
            StatusCode::TOO_EARLY => Err(RepackerError::Wait),
            StatusCode::OK => Ok(resp.text().await?),
            status => Err(RepackerError::BadStatus(status.to_string())),
        }
    }

    /// Refresh the lease on a previously leased date. In-progress dates
    /// should be updated more frequently than the server's lease timeout.
    pub async fn update(&self, date: &str) -> Result<(), RepackerError> {
        self.request("/v1/update", date).await
    }

    /// Mark a previously leased date as complete.
    pub async fn complete(&self, date: &str) -> Result<(), RepackerError> {
        self.request("/v1/complete", date).await
    }

    async fn request(&self, path: &str, date: &str) -> Result<(), RepackerError> {
        let url = format!("{}{}", self.base, path);
        let resp = self.http.get(&url).query(&[("date", date)]).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(RepackerError::BadStatus(resp.status().to_string()));
        }
        Ok(())
    }
}
