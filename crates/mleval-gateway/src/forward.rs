use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use reqwest::header::{HeaderMap as ReqwestHeaderMap, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};

use mleval_common::{IoSchema, ModelId};
use mleval_registry::{CompletionTracker, ModelRegistry};
use mleval_scheduler::HostScheduler;

use crate::error::ApiError;
use crate::metrics::Metrics;

/// Header carrying the model id on relayed worker responses.
pub const MODEL_ID_HEADER: &str = "x-model-id";

/// A file taken from an inbound multipart request, either already read or
/// still arriving from the client.
#[derive(Debug)]
pub struct Artifact {
    file_name: String,
    body: reqwest::Body,
    len: Option<u64>,
}

impl Artifact {
    pub fn buffered(file_name: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            len: Some(bytes.len() as u64),
            body: reqwest::Body::from(bytes),
        }
    }

    /// The body is sent chunk by chunk as it is read, so its length is unknown.
    pub fn streamed(file_name: impl Into<String>, body: reqwest::Body) -> Self {
        Self {
            file_name: file_name.into(),
            body,
            len: None,
        }
    }

    fn into_part(self) -> Result<Part, ApiError> {
        let part = match self.len {
            Some(len) => Part::stream_with_length(self.body, len),
            None => Part::stream(self.body),
        };
        part.file_name(self.file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| ApiError::Internal(format!("building artifact part: {e}")))
    }
}

/// Inputs of a training job, as received from the client.
#[derive(Debug)]
pub struct TrainUpload {
    pub name: String,
    pub description: String,
    pub training_data: Artifact,
    /// Raw JSON side-channel, decoded into an [`IoSchema`] before anything is registered.
    pub io_params: Bytes,
}

/// A worker's answer, relayed to the client without interpretation.
#[derive(Debug)]
pub struct WorkerReply {
    pub status: StatusCode,
    pub headers: ReqwestHeaderMap,
    pub body: Bytes,
}

impl WorkerReply {
    pub fn with_model_id(self, id: ModelId) -> Response {
        let mut out = self.into_response();
        out.headers_mut()
            .insert(MODEL_ID_HEADER, HeaderValue::from(id));
        out
    }
}

impl IntoResponse for WorkerReply {
    fn into_response(self) -> Response {
        let mut out = Response::builder()
            .status(self.status)
            .body(Body::from(self.body))
            .unwrap_or_else(|_| Response::new(Body::empty()));
        copy_response_headers(&self.headers, &mut out);
        out
    }
}

fn copy_response_headers(src: &ReqwestHeaderMap, dst: &mut Response) {
    for (k, v) in src.iter() {
        if k.as_str().eq_ignore_ascii_case("transfer-encoding")
            || k.as_str().eq_ignore_ascii_case("content-length")
            || k.as_str().eq_ignore_ascii_case("connection")
            || k.as_str().eq_ignore_ascii_case("keep-alive")
            || k.as_str().eq_ignore_ascii_case("proxy-authenticate")
            || k.as_str().eq_ignore_ascii_case("proxy-authorization")
            || k.as_str().eq_ignore_ascii_case("te")
            || k.as_str().eq_ignore_ascii_case("trailer")
            || k.as_str().eq_ignore_ascii_case("upgrade")
        {
            continue;
        }

        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(k.as_str().as_bytes()),
            HeaderValue::from_bytes(v.as_bytes()),
        ) {
            dst.headers_mut().append(name, value);
        }
    }
}

/// Decode the `io_params` side-channel.
pub fn parse_io_params(raw: &[u8]) -> Result<IoSchema, ApiError> {
    serde_json::from_slice(raw)
        .map_err(|e| ApiError::malformed(format!("invalid io_params: {e}")))
}

fn json_part(
    encoded: serde_json::Result<Vec<u8>>,
    file_name: &'static str,
) -> Result<Part, ApiError> {
    let bytes = encoded.map_err(|e| ApiError::Internal(format!("encoding {file_name}: {e}")))?;
    Part::bytes(bytes)
        .file_name(file_name)
        .mime_str("application/json")
        .map_err(|e| ApiError::Internal(format!("building {file_name} part: {e}")))
}

#[derive(Debug, Clone, Copy)]
enum Dispatch {
    Load,
    Train,
}

impl Dispatch {
    fn path(&self) -> &'static str {
        match self {
            Dispatch::Load => "load",
            Dispatch::Train => "train",
        }
    }
}

/// Proxies artifacts, training jobs and eval requests to workers.
///
/// Registry, scheduler and tracker locks are only held for the bookkeeping
/// calls below; every network call happens with no lock held.
pub struct Forwarder {
    http: reqwest::Client,
    registry: Arc<ModelRegistry>,
    scheduler: Arc<HostScheduler>,
    tracker: Arc<CompletionTracker>,
    metrics: Arc<Metrics>,
}

impl Forwarder {
    pub fn new(
        http: reqwest::Client,
        registry: Arc<ModelRegistry>,
        scheduler: Arc<HostScheduler>,
        tracker: Arc<CompletionTracker>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            http,
            registry,
            scheduler,
            tracker,
            metrics,
        }
    }

    /// Send an artifact for a registered model to its worker as
    /// `model` + `metadata` + `io_params` parts.
    pub async fn forward_load(
        &self,
        id: ModelId,
        artifact: Artifact,
    ) -> Result<WorkerReply, ApiError> {
        let record = self.registry.get(id).await?;

        let form = Form::new()
            .part("model", artifact.into_part()?)
            .part("metadata", json_part(record.metadata_json(), "metadata.json")?)
            .part("io_params", json_part(record.io_params_json(), "io_params.json")?);

        let host = self.scheduler.assign_or_get(id).await?;
        self.dispatch(Dispatch::Load, id, &host, form).await
    }

    /// Register a fresh model and load `artifact` for it in one step.
    pub async fn register_and_load(
        &self,
        name: String,
        description: String,
        io_params: Option<Bytes>,
        artifact: Artifact,
    ) -> Result<(ModelId, WorkerReply), ApiError> {
        let schema = io_params.map(|raw| parse_io_params(&raw)).transpose()?;
        // the pool is fixed, so an empty one stays empty: fail before minting an id
        self.scheduler.least_loaded_worker().await?;

        let id = self.registry.register(name, description, schema).await?;
        let reply = self
            .forward_load(id, artifact)
            .await
            .map_err(|e| e.for_model(id))?;
        Ok((id, reply))
    }

    /// Training always mints a new model; it never retrains an existing id.
    pub async fn forward_train(
        &self,
        upload: TrainUpload,
    ) -> Result<(ModelId, WorkerReply), ApiError> {
        let schema = parse_io_params(&upload.io_params)?;
        let form = Form::new()
            .part("training_data", upload.training_data.into_part()?)
            .part("io_params", json_part(serde_json::to_vec(&schema), "io_params.json")?);
        self.scheduler.least_loaded_worker().await?;

        let id = self
            .registry
            .register(upload.name, upload.description, Some(schema))
            .await?;

        let host = self.scheduler.assign_or_get(id).await?;
        let reply = self
            .dispatch(Dispatch::Train, id, &host, form)
            .await
            .map_err(|e| e.for_model(id))?;
        Ok((id, reply))
    }

    /// Stream an eval request to the worker already holding the model.
    pub async fn forward_eval(
        &self,
        id: ModelId,
        body: reqwest::Body,
        content_type: Option<HeaderValue>,
    ) -> Result<WorkerReply, ApiError> {
        let worker = self.scheduler.worker_for(id).await?;
        let url = format!("{}/eval/{id}", worker.endpoint);

        let mut builder = self.http.post(&url).body(body);
        if let Some(ct) = content_type {
            builder = builder.header(CONTENT_TYPE, ct);
        }

        self.metrics.evals_total.fetch_add(1, Ordering::Relaxed);
        let reply = self.send(&url, builder).await?;
        tracing::info!(
            model_id = id,
            host = %url,
            status = reply.status.as_u16(),
            "processed eval"
        );
        Ok(reply)
    }

    /// The pending marker is set before the call and cleared again if the
    /// worker never accepted the job, so a failed dispatch does not stay
    /// pending forever.
    async fn dispatch(
        &self,
        kind: Dispatch,
        id: ModelId,
        host: &str,
        form: Form,
    ) -> Result<WorkerReply, ApiError> {
        let url = format!("{host}/{}/{id}", kind.path());
        let counter = match kind {
            Dispatch::Load => &self.metrics.load_dispatches_total,
            Dispatch::Train => &self.metrics.train_dispatches_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.tracker.mark_pending(id);
        tracing::info!(model_id = id, host = %url, kind = kind.path(), "dispatching to worker");

        match self.send(&url, self.http.post(&url).multipart(form)).await {
            Ok(reply) => {
                if reply.status.is_success() {
                    tracing::info!(
                        model_id = id,
                        host = %url,
                        status = reply.status.as_u16(),
                        "worker accepted dispatch"
                    );
                } else {
                    self.tracker.clear(id);
                    tracing::warn!(
                        model_id = id,
                        host = %url,
                        status = reply.status.as_u16(),
                        body = %String::from_utf8_lossy(&reply.body),
                        "worker rejected dispatch"
                    );
                }
                Ok(reply)
            }
            Err(e) => {
                self.tracker.clear(id);
                Err(e)
            }
        }
    }

    async fn send(
        &self,
        url: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<WorkerReply, ApiError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| self.upstream_error(url, &e))?;

        let status =
            StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|e| self.upstream_error(url, &e))?;

        Ok(WorkerReply {
            status,
            headers,
            body,
        })
    }

    fn upstream_error(&self, url: &str, error: &reqwest::Error) -> ApiError {
        let err = ApiError::upstream(url, error);
        if let ApiError::Upstream { kind, .. } = &err {
            self.metrics.record_upstream_error(*kind);
            tracing::error!(error = %error, kind = %kind, host = %url, "worker request failed");
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_io_params() {
        let schema = parse_io_params(
            br#"{"input_features":[{"name":"review","type":"text","encoder":"parallel_cnn"}],
                 "output_features":[{"name":"sentiment","type":"category"}]}"#,
        )
        .unwrap();
        assert_eq!(schema.input_features[0].encoder, "parallel_cnn");
        assert_eq!(schema.output_features[0].feature_type, "category");
    }

    #[test]
    fn test_parse_io_params_rejects_garbage() {
        let err = parse_io_params(b"not json").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_reply_drops_hop_by_hop_headers() {
        let mut headers = ReqwestHeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));

        let reply = WorkerReply {
            status: StatusCode::ACCEPTED,
            headers,
            body: Bytes::from_static(b"{}"),
        };
        let out = reply.with_model_id(4);
        assert_eq!(out.status(), StatusCode::ACCEPTED);
        assert_eq!(out.headers()["content-type"], "application/json");
        assert_eq!(out.headers()[MODEL_ID_HEADER], "4");
        assert!(out.headers().get("connection").is_none());
    }

    #[test]
    fn test_reply_keeps_repeated_headers() {
        let mut headers = ReqwestHeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let reply = WorkerReply {
            status: StatusCode::OK,
            headers,
            body: Bytes::new(),
        };
        let out = reply.into_response();
        let cookies: Vec<_> = out.headers().get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_artifact_lengths() {
        let buffered = Artifact::buffered("m.zip", Bytes::from_static(b"weights"));
        assert_eq!(buffered.len, Some(7));
        assert!(buffered.into_part().is_ok());

        let streamed = Artifact::streamed("m.zip", reqwest::Body::from("weights"));
        assert_eq!(streamed.len, None);
        assert!(streamed.into_part().is_ok());
    }
}
