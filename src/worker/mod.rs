//! Job execution
//!
//! - `pool`: bounded in-process queue and the workers draining it
//! - `processor`: worker phase of a job, up to the ML publish
//! - `correlator`: consumer of the shared ML response queue
//! - `router`: writes the final artifact of a job

pub mod correlator;
pub mod pool;
pub mod processor;
pub mod router;

pub use correlator::{Disposition, ResponseCorrelator};
pub use pool::{JobQueue, WorkerPool};
pub use processor::{JobProcessor, SUBMIT_FAILURE_PREFIX};
pub use router::{risk_percentage, ResultRouter, RouteOutcome};
