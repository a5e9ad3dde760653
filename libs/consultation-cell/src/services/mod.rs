pub mod orchestrator;
pub mod templates;
pub mod transport;

pub use orchestrator::ConsultationOrchestrator;
pub use templates::{validate_response, TemplateRegistry, FOLLOW_UP_CHECK, GENERAL_INTAKE};
pub use transport::{ChatTransport, SimulatedChatTransport, SimulatedVideoTransport, VideoTransport};
