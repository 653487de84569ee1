use std::collections::{BTreeMap, HashMap};
use std::io;

use axum::{
    body::Body,
    extract::{
        multipart::{Field, MultipartError},
        FromRequest, Multipart, Path, State,
    },
    http::{header::CONTENT_TYPE, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use mleval_common::{IoSchema, ModelId, ModelRecord, NotifyDone, WorkerDescriptor};

use crate::error::ApiError;
use crate::forward::{Artifact, TrainUpload, WorkerReply, MODEL_ID_HEADER};
use crate::state::AppState;

/// JSON body of `POST /model`. A client-supplied `id` is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterModel {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub io_params: Option<IoSchema>,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn parse_model_id(raw: &str) -> Result<ModelId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::malformed(format!("invalid model id `{raw}`")))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Map an axum body rejection onto the gateway's error taxonomy.
fn rejection_error(status: StatusCode, text: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(text)
    } else {
        ApiError::malformed(text)
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    rejection_error(e.status(), e.body_text())
}

async fn open_multipart(st: &AppState, req: Request<Body>) -> Result<Multipart, ApiError> {
    Multipart::from_request(req, st)
        .await
        .map_err(|e| rejection_error(e.status(), e.body_text()))
}

struct FormField {
    file_name: Option<String>,
    bytes: Bytes,
}

/// All fields of an inbound multipart body, keyed by field name.
struct UploadForm {
    fields: HashMap<String, FormField>,
}

impl UploadForm {
    async fn read(st: &AppState, req: Request<Body>) -> Result<Self, ApiError> {
        let mut multipart = open_multipart(st, req).await?;

        let mut fields = HashMap::new();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let file_name = field.file_name().map(str::to_string);
            let bytes = field.bytes().await.map_err(multipart_error)?;
            tracing::debug!(field = %name, size = bytes.len(), "read multipart field");
            fields.insert(name, FormField { file_name, bytes });
        }
        Ok(Self { fields })
    }

    fn file(&mut self, name: &str) -> Result<Artifact, ApiError> {
        let field = self
            .fields
            .remove(name)
            .ok_or_else(|| ApiError::malformed(format!("missing multipart field `{name}`")))?;
        let file_name = field.file_name.unwrap_or_else(|| name.to_string());
        Ok(Artifact::buffered(file_name, field.bytes))
    }

    fn bytes(&mut self, name: &str) -> Option<Bytes> {
        self.fields.remove(name).map(|f| f.bytes)
    }

    fn text(&mut self, name: &str) -> Option<String> {
        self.bytes(name)
            .map(|b| String::from_utf8_lossy(&b).trim().to_string())
    }
}

/// 202 with the new id when the worker took the job, otherwise the worker's
/// own answer.
fn accepted_or_relay(id: ModelId, reply: WorkerReply) -> Response {
    if reply.status.is_success() {
        (
            StatusCode::ACCEPTED,
            [(MODEL_ID_HEADER, id.to_string())],
            Json(id),
        )
            .into_response()
    } else {
        reply.with_model_id(id)
    }
}

/// Re-stream an inbound body to the worker without buffering it.
fn streaming_body(body: Body) -> reqwest::Body {
    let mut inbound = body.into_data_stream();
    let (tx, rx) = mpsc::channel::<Result<Bytes, axum::Error>>(16);
    tokio::spawn(async move {
        while let Some(item) = inbound.next().await {
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });
    reqwest::Body::wrap_stream(ReceiverStream::new(rx))
}

/// Feed a multipart field into `tx` chunk by chunk. Stops quietly once the
/// receiving side is gone, since the forwarder reports that failure itself.
async fn pump_field(
    mut field: Field<'_>,
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
) -> Result<(), ApiError> {
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if tx.send(Ok(chunk)).await.is_err() {
                    return Ok(());
                }
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                let err = multipart_error(e);
                let _ = tx.send(Err(io::Error::other(err.to_string()))).await;
                return Err(err);
            }
        }
    }
}

pub async fn list_models(State(st): State<AppState>) -> Json<BTreeMap<ModelId, ModelRecord>> {
    Json(st.registry.list().await)
}

pub async fn get_model(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ModelRecord>, ApiError> {
    let id = parse_model_id(&id)?;
    Ok(Json(st.registry.get(id).await?))
}

/// `POST /model`: JSON registers metadata only; multipart registers and
/// uploads the `model` artifact in one go.
pub async fn create_model(
    State(st): State<AppState>,
    req: Request<Body>,
) -> Result<Response, ApiError> {
    if is_multipart(req.headers()) {
        let mut form = UploadForm::read(&st, req).await?;
        let artifact = form.file("model")?;
        let name = form.text("name").unwrap_or_default();
        let description = form.text("description").unwrap_or_default();
        let io_params = form.bytes("io_params");

        let (id, reply) = st
            .forwarder
            .register_and_load(name, description, io_params, artifact)
            .await?;
        return Ok(accepted_or_relay(id, reply));
    }

    let body = Bytes::from_request(req, &st)
        .await
        .map_err(|e| rejection_error(e.status(), e.body_text()))?;
    let meta: RegisterModel = if body.iter().all(u8::is_ascii_whitespace) {
        RegisterModel::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::malformed(format!("invalid model metadata: {e}")))?
    };

    let id = st
        .registry
        .register(meta.name, meta.description, meta.io_params)
        .await?;
    Ok(Json(id).into_response())
}

/// `POST /model/{id}`: load an artifact for an already registered model.
/// The `model` field is relayed to the worker while it is still being read.
pub async fn upload_model(
    State(st): State<AppState>,
    Path(id): Path<String>,
    req: Request<Body>,
) -> Result<Response, ApiError> {
    let id = parse_model_id(&id)?;
    // reject unknown ids before reading a potentially large body
    st.registry.get(id).await?;

    let mut multipart = open_multipart(&st, req).await?;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("model") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("model").to_string();
        let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(16);
        let body = reqwest::Body::wrap_stream(ReceiverStream::new(rx));
        let artifact = Artifact::streamed(file_name, body);

        let (reply, pumped) = tokio::join!(
            st.forwarder.forward_load(id, artifact),
            pump_field(field, tx)
        );
        if let Err(e) = pumped {
            // the worker got a truncated artifact
            st.tracker.clear(id);
            return Err(e);
        }
        return Ok(reply?.with_model_id(id));
    }

    Err(ApiError::malformed("missing multipart field `model`"))
}

pub async fn eval_model(
    State(st): State<AppState>,
    Path(id): Path<String>,
    req: Request<Body>,
) -> Result<Response, ApiError> {
    let id = parse_model_id(&id)?;
    let content_type = req.headers().get(CONTENT_TYPE).cloned();
    let body = streaming_body(req.into_body());

    let reply = st.forwarder.forward_eval(id, body, content_type).await?;
    Ok(reply.into_response())
}

pub async fn train_model(
    State(st): State<AppState>,
    req: Request<Body>,
) -> Result<Response, ApiError> {
    let mut form = UploadForm::read(&st, req).await?;
    let training_data = form.file("training_data")?;
    let io_params = form
        .bytes("io_params")
        .ok_or_else(|| ApiError::malformed("missing multipart field `io_params`"))?;

    let upload = TrainUpload {
        name: form.text("name").unwrap_or_default(),
        description: form.text("description").unwrap_or_default(),
        training_data,
        io_params,
    };
    let (id, reply) = st.forwarder.forward_train(upload).await?;
    Ok(accepted_or_relay(id, reply))
}

/// Completion callback posted by workers.
pub async fn on_finished(
    State(st): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let NotifyDone { id } = serde_json::from_slice(&body)
        .map_err(|e| ApiError::malformed(format!("invalid completion notice: {e}")))?;

    st.tracker.mark_done(id)?;
    st.metrics
        .completions_total
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    Ok(Json(json!({ "id": id, "done": true })))
}

pub async fn model_status(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_model_id(&id)?;
    let done = st.tracker.status_of(id)?;
    Ok(Json(json!({ "id": id, "done": done })))
}

pub async fn list_nodes(State(st): State<AppState>) -> Json<Vec<WorkerDescriptor>> {
    Json(st.scheduler.workers().await)
}

#[cfg(test)]
mod tests {
    use mleval_scheduler::HostPool;

    use super::*;

    #[test]
    fn test_parse_model_id() {
        assert_eq!(parse_model_id("42").unwrap(), 42);
        assert_eq!(
            parse_model_id("abc").unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_is_multipart() {
        let mut headers = HeaderMap::new();
        assert!(!is_multipart(&headers));
        headers.insert(
            CONTENT_TYPE,
            "multipart/form-data; boundary=abc".parse().unwrap(),
        );
        assert!(is_multipart(&headers));
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        assert!(!is_multipart(&headers));
    }

    #[test]
    fn test_rejection_error_mapping() {
        assert_eq!(
            rejection_error(StatusCode::PAYLOAD_TOO_LARGE, "too big".into()).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            rejection_error(StatusCode::BAD_REQUEST, "stream reset".into()).code(),
            "malformed_request"
        );
    }

    #[tokio::test]
    async fn test_broken_register_body_is_not_payload_too_large() {
        let st = AppState::new(HostPool::default(), reqwest::Client::new(), 1024);
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"name\":")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ];
        let req = Request::post("/model")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from_stream(futures_util::stream::iter(chunks)))
            .unwrap();

        let err = create_model(State(st.clone()), req).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(st.registry.is_empty().await);
    }

    #[test]
    fn test_register_body_ignores_client_id() {
        let meta: RegisterModel = serde_json::from_str(
            r#"{"id": 99, "name": "iris", "description": "flowers",
                "io_params": {"input_features": [], "output_features": []}}"#,
        )
        .unwrap();
        assert_eq!(meta.name, "iris");
        assert_eq!(meta.io_params, Some(IoSchema::default()));
    }
}
