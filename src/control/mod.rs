pub mod client;
pub mod error;
pub mod server;
pub mod single_flight;
pub mod types;

pub use client::ControlClient;
pub use error::ControlError;
pub use server::{start_control_server, ControlHandler, ControlServer};
pub use single_flight::{Admission, SingleFlight};
pub use types::{ControlRequest, ControlResponse, TaskId, WorkerId};
