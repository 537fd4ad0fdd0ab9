pub mod config;
pub mod ipc;
pub mod path_detector;
pub mod supervisor;
pub mod world;
