//! Hand-off of leased credentials to the job processor
//!
//! The processor is invoked fire-and-forget: it runs for far longer than we
//! wait, so the POST uses a short read timeout and a read timeout counts as a
//! successful hand-off. The processor reports back through the release
//! webhook; nothing here touches the lease.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use common::Secret;
use lease_pool::{Dispatcher, Job, Lease};
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;

/// POSTs each leased job to the processor URL.
pub struct HttpDispatcher {
    client: reqwest::Client,
    processor_url: String,
    release_url: String,
    trigger_job_url: String,
    token: Option<Secret<String>>,
}

impl HttpDispatcher {
    pub fn new(
        processor_url: impl Into<String>,
        release_url: impl Into<String>,
        trigger_job_url: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()?;
        Ok(Self {
            client,
            processor_url: processor_url.into(),
            release_url: release_url.into(),
            trigger_job_url: trigger_job_url.into(),
            token: None,
        })
    }

    pub fn from_config(config: &DispatchConfig) -> reqwest::Result<Self> {
        let dispatcher = Self::new(
            &config.processor_url,
            &config.release_url,
            &config.trigger_job_url,
            config.connect_timeout(),
            config.read_timeout(),
        )?;
        Ok(match &config.processor_token {
            Some(token) => dispatcher.with_token(token.clone()),
            None => dispatcher,
        })
    }

    pub fn with_token(mut self, token: Secret<String>) -> Self {
        self.token = Some(token);
        self
    }

    /// Processor request body: the caller's job parameters plus the lease.
    fn payload(&self, job: &Job, lease: &Lease) -> serde_json::Value {
        let mut body = match &job.payload {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        body.insert("job_id".into(), job.id.clone().into());
        body.insert("cookie_id".into(), lease.credential_id.clone().into());
        body.insert("cookies".into(), lease.cookie.expose().clone().into());
        body.insert("csrf_token".into(), lease.csrf_token.expose().clone().into());
        body.insert("cookies_release_url".into(), self.release_url.clone().into());
        body.insert("trigger_job_url".into(), self.trigger_job_url.clone().into());
        serde_json::Value::Object(body)
    }

    async fn send(&self, job: &Job, lease: &Lease) {
        let started = Instant::now();
        let mut request = self
            .client
            .post(&self.processor_url)
            .json(&self.payload(job, lease));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose());
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!(
                    job_id = job.id,
                    category = job.category,
                    credential_id = lease.credential_id,
                    status = response.status().as_u16(),
                    "job handed to processor"
                );
            }
            Ok(response) => {
                warn!(
                    job_id = job.id,
                    category = job.category,
                    credential_id = lease.credential_id,
                    status = response.status().as_u16(),
                    "processor rejected job"
                );
                crate::metrics::record_dispatch_error(&job.category, "status");
            }
            Err(e) if e.is_timeout() && !e.is_connect() => {
                debug!(
                    job_id = job.id,
                    category = job.category,
                    credential_id = lease.credential_id,
                    "processor still running after read timeout, treating as handed off"
                );
            }
            Err(e) => {
                let error_type = if e.is_connect() {
                    "connect"
                } else if e.is_timeout() {
                    "timeout"
                } else {
                    "request"
                };
                warn!(
                    job_id = job.id,
                    category = job.category,
                    credential_id = lease.credential_id,
                    error_type,
                    error = %e,
                    "failed to reach processor"
                );
                crate::metrics::record_dispatch_error(&job.category, error_type);
            }
        }

        crate::metrics::record_dispatch(&job.category, started.elapsed().as_secs_f64());
    }
}

impl Dispatcher for HttpDispatcher {
    fn dispatch<'a>(
        &'a self,
        job: &'a Job,
        lease: &'a Lease,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.send(job, lease))
    }
}
