pub mod app_config;
pub mod coordinator;
pub mod dispatcher;
pub mod load_balancer;
pub mod memory;
pub mod observability;
pub mod queue;
pub mod registry;

pub use app_config::*;
pub use coordinator::*;
pub use dispatcher::*;
pub use load_balancer::*;
pub use memory::*;
pub use observability::*;
pub use queue::*;
pub use registry::*;
