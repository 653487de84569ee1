use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[arg(long, env = "MLEVAL_LISTEN_ADDR", default_value = "0.0.0.0:5000")]
    pub listen_addr: String,

    /// Comma-separated worker base URLs (e.g. "http://10.0.0.5:8000,http://10.0.0.6:8000").
    #[arg(long, env = "HOSTS")]
    pub hosts: Option<String>,

    #[arg(long, env = "MLEVAL_CONNECT_TIMEOUT_MS", default_value_t = 3_000)]
    pub connect_timeout_ms: u64,

    /// Deadline for a whole outbound worker call, including the response body.
    #[arg(long, env = "MLEVAL_REQUEST_TIMEOUT_MS", default_value_t = 300_000)]
    pub request_timeout_ms: u64,

    #[arg(long, env = "MLEVAL_MAX_UPLOAD_BYTES", default_value_t = (1usize << 31) - 1)]
    pub max_upload_bytes: usize,

    /// "text" or "json".
    #[arg(long, env = "MLEVAL_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// OTLP/HTTP endpoint for exporting traces.
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
