pub mod error_info;
pub mod errors;
pub mod messages;
pub mod requests;

pub use error_info::{ErrorDetails, ErrorInfo};
pub use errors::{RuntimeError, SendableError};
pub use messages::{Attributes, Message, PublishResult, PullResponse, ReceivedMessage};
pub use requests::{AcknowledgeRequest, PullRequest};
