pub mod fmdm_broadcaster;
pub mod folder_lifecycle;
pub mod lifecycle;
pub mod orchestrator;
pub mod rest;
pub mod router;
pub mod scheduler;
pub mod server;

pub use fmdm_broadcaster::FmdmBroadcaster;
pub use folder_lifecycle::{FolderEvent, FolderLifecycleManager, ManagerCommand};
pub use lifecycle::{Daemon, DaemonConfig, LifecycleError, is_running, pid_file_path, remove_pid_file, write_pid_file};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use rest::router as rest_router;
pub use router::{ClientType, Request, Response, Router, RpcError};
pub use scheduler::{Scheduler, SchedulerConfig, spawn_scheduler, spawn_scheduler_with_config};
pub use server::{Client, Server, ServerError, ShutdownHandle, default_socket_path};
