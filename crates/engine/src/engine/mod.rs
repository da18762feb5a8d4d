mod alert_engine;
mod retry;
mod supervise;

pub use alert_engine::{AlertEngine, Disposer, EngineDeps, JobResult};
pub use retry::{process_job_with_retry, ExecDeps};
pub use supervise::{supervise, PanicReport, Supervised};
