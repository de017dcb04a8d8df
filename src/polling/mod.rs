pub mod completion;
pub mod mrn;
pub mod service;

pub use mrn::Mrn;
pub use service::PollingService;
