pub mod classifier;
pub mod config;
pub mod continuity;
pub mod cookies;
pub mod delay_manager;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod input_loader;
pub mod job_manager;
pub mod logger;
pub mod orchestrator;
pub mod output_writer;
pub mod session;
pub mod transport;

// Exporting types for convenience
pub use classifier::{classify, ClassificationResult};
pub use config::ScraperConfig;
pub use error::{ScrapeError, TransportError};
pub use extractor::{extract, ExtractedDetail, OfficeDetail};
pub use input_loader::Record;
pub use job_manager::JobManager;
pub use orchestrator::Orchestrator;
pub use session::{Session, SessionHandle, SessionStatus};
pub use transport::{HttpTransport, Transport};
