pub mod model;
pub mod worker;

pub use model::{IoSchema, ModelFeature, ModelId, ModelRecord, NotifyDone};
pub use worker::{parse_hosts, WorkerDescriptor};

pub mod telemetry;
