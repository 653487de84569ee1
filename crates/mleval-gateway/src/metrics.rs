use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::UpstreamKind;
use crate::state::AppState;

#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub requests_inflight: AtomicU64,
    pub status_2xx: AtomicU64,
    pub status_4xx: AtomicU64,
    pub status_5xx: AtomicU64,
    pub load_dispatches_total: AtomicU64,
    pub train_dispatches_total: AtomicU64,
    pub evals_total: AtomicU64,
    pub completions_total: AtomicU64,
    pub upstream_timeout_total: AtomicU64,
    pub upstream_connect_total: AtomicU64,
    pub upstream_other_total: AtomicU64,
}

impl Metrics {
    pub fn record_upstream_error(&self, kind: UpstreamKind) {
        let counter = match kind {
            UpstreamKind::Timeout => &self.upstream_timeout_total,
            UpstreamKind::Connect => &self.upstream_connect_total,
            UpstreamKind::Other => &self.upstream_other_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn render_metrics(metrics: &Metrics) -> String {
    let mut body = String::new();

    body.push_str(&format!(
        "# HELP mleval_gateway_requests_total Total requests handled by the gateway.\n\
         # TYPE mleval_gateway_requests_total counter\n\
         mleval_gateway_requests_total {}\n",
        metrics.requests_total.load(Ordering::Relaxed),
    ));
    body.push_str(&format!(
        "# HELP mleval_gateway_requests_inflight Currently in-flight requests.\n\
         # TYPE mleval_gateway_requests_inflight gauge\n\
         mleval_gateway_requests_inflight {}\n",
        metrics.requests_inflight.load(Ordering::Relaxed),
    ));
    body.push_str(&format!(
        "# HELP mleval_gateway_responses_2xx Total 2xx responses.\n\
         # TYPE mleval_gateway_responses_2xx counter\n\
         mleval_gateway_responses_2xx {}\n",
        metrics.status_2xx.load(Ordering::Relaxed),
    ));
    body.push_str(&format!(
        "# HELP mleval_gateway_responses_4xx Total 4xx responses.\n\
         # TYPE mleval_gateway_responses_4xx counter\n\
         mleval_gateway_responses_4xx {}\n",
        metrics.status_4xx.load(Ordering::Relaxed),
    ));
    body.push_str(&format!(
        "# HELP mleval_gateway_responses_5xx Total 5xx responses.\n\
         # TYPE mleval_gateway_responses_5xx counter\n\
         mleval_gateway_responses_5xx {}\n",
        metrics.status_5xx.load(Ordering::Relaxed),
    ));
    body.push_str(&format!(
        "# HELP mleval_gateway_dispatches_total Load and train requests forwarded to workers.\n\
         # TYPE mleval_gateway_dispatches_total counter\n\
         mleval_gateway_dispatches_total{{kind=\"load\"}} {}\n\
         mleval_gateway_dispatches_total{{kind=\"train\"}} {}\n",
        metrics.load_dispatches_total.load(Ordering::Relaxed),
        metrics.train_dispatches_total.load(Ordering::Relaxed),
    ));
    body.push_str(&format!(
        "# HELP mleval_gateway_evals_total Eval requests forwarded to workers.\n\
         # TYPE mleval_gateway_evals_total counter\n\
         mleval_gateway_evals_total {}\n",
        metrics.evals_total.load(Ordering::Relaxed),
    ));
    body.push_str(&format!(
        "# HELP mleval_gateway_completions_total Completion callbacks accepted from workers.\n\
         # TYPE mleval_gateway_completions_total counter\n\
         mleval_gateway_completions_total {}\n",
        metrics.completions_total.load(Ordering::Relaxed),
    ));
    body.push_str(&format!(
        "# HELP mleval_gateway_upstream_errors_total Failed outbound worker calls.\n\
         # TYPE mleval_gateway_upstream_errors_total counter\n\
         mleval_gateway_upstream_errors_total{{kind=\"timeout\"}} {}\n\
         mleval_gateway_upstream_errors_total{{kind=\"connect\"}} {}\n\
         mleval_gateway_upstream_errors_total{{kind=\"other\"}} {}\n",
        metrics.upstream_timeout_total.load(Ordering::Relaxed),
        metrics.upstream_connect_total.load(Ordering::Relaxed),
        metrics.upstream_other_total.load(Ordering::Relaxed),
    ));

    body
}

pub async fn metrics_handler(State(st): State<AppState>) -> impl IntoResponse {
    let body = render_metrics(&st.metrics);
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

pub async fn track_requests(
    State(st): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, std::convert::Infallible> {
    st.metrics.requests_inflight.fetch_add(1, Ordering::Relaxed);
    let resp = next.run(req).await;
    st.metrics.requests_inflight.fetch_sub(1, Ordering::Relaxed);
    st.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let status = resp.status().as_u16();
    if status >= 500 {
        st.metrics.status_5xx.fetch_add(1, Ordering::Relaxed);
    } else if status >= 400 {
        st.metrics.status_4xx.fetch_add(1, Ordering::Relaxed);
    } else if status >= 200 {
        st.metrics.status_2xx.fetch_add(1, Ordering::Relaxed);
    }

    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_metrics() {
        let metrics = Metrics::default();
        metrics.load_dispatches_total.fetch_add(2, Ordering::Relaxed);
        metrics.record_upstream_error(UpstreamKind::Connect);

        let body = render_metrics(&metrics);
        assert!(body.contains("mleval_gateway_dispatches_total{kind=\"load\"} 2\n"));
        assert!(body.contains("mleval_gateway_upstream_errors_total{kind=\"connect\"} 1\n"));
        assert!(body.contains("# TYPE mleval_gateway_requests_inflight gauge\n"));
    }
}
