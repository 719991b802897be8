pub mod backup;
pub mod config;
pub mod db;
pub mod grading;
pub mod http;
pub mod ipc;
pub mod rapot;
pub mod spreadsheet;
