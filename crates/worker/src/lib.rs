pub mod backends;
pub mod dispatch;
pub mod registry;

pub use backends::{build_backend, HttpBackend, SimulatedBackend};
pub use dispatch::TaskDispatcher;
pub use registry::{compute_health, score_worker, WorkerRegistry, WorkerStatusReport};
