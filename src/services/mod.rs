pub mod artifact;
pub mod ask_llm;
pub mod mailer;
pub mod progress;

pub use artifact::{load_assignments, save_assignments};
pub use ask_llm::analyze_assignments;
pub use mailer::send_report;
pub use progress::Spinner;
