mod client;
mod process;
mod supervisor;
mod types;

pub use client::{rpc_url, Aria2Client};
pub use process::{
    build_args, find_available_port, is_port_available, is_process_running,
    kill_processes_named, reclaim_port, Aria2Process, LaunchConfig,
};
pub use supervisor::{
    create_shared_supervisor, spawn_health_check_loop, Aria2Supervisor, SharedSupervisor,
    SupervisorEvent,
};
pub use types::*;
