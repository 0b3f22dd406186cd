pub mod error;
pub mod response;
pub mod time;

pub use error::{ErrorCategory, MediatorError, Result};
pub use response::{
    CoreResponse, DescriptiveStatus, Orchestration, RequestSnapshot, ResponseDetail,
};
pub use time::Timestamp;
