//! Responses API data model, public event catalogue, and chat-completion
//! wire types shared between the engine, the stream translator, the
//! backend adapter, and the tool registry.

pub mod chunk;
pub mod error;
pub mod event_types;
pub mod item;
pub mod request;
pub mod response;

pub use chunk::{finish_reason_to_status, ChatChunk, ChatCompletionResponse};
pub use error::{ApiError, ErrorKind};
pub use event_types::{PublicEvent, PublicEventKind, ProviderEvent};
pub use item::{generate_id, ContentPart, Item, ItemStatus};
pub use request::{ResponseInput, ResponsesRequest, ToolChoice, ToolDef};
pub use response::{IncompleteDetails, Response, ResponseError, ResponseStatus, Usage};
