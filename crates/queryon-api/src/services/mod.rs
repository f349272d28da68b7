// Service layer consumed by the HTTP routers

pub mod appointment;
pub mod availability;
pub mod orchestrator;
pub mod webhook;

pub use appointment::AppointmentService;
pub use availability::AvailabilityService;
pub use orchestrator::OrchestratorService;
