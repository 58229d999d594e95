pub mod error;
pub mod media;
pub mod message;
pub mod model;
pub mod outcome;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{DreamcutError, ModelError, Result, StepError};
    pub use crate::media::MediaType;
    pub use crate::message::{ContentPart, Message, MessageContent};
    pub use crate::model::{
        CallOptions, ChatModel, ChatResult, ResponseFormat, VisionModel, VisionRequest,
        VisionResponse,
    };
    pub use crate::outcome::{StepReport, StepResult};
}
