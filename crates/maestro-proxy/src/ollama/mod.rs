//! Ollama REST API behind the lease protocol.

mod client;
mod proxy;
mod types;

pub use client::{OllamaClient, StreamableRequest};
pub use proxy::OllamaProxy;
pub use types::{
    ChatRequest, ChatResponse, CopyRequest, CreateRequest, DeleteRequest, EmbedRequest,
    EmbedResponse, GenerateRequest, GenerateResponse, Message, OllamaModel, ProgressResponse,
    PullRequest, PushRequest, RunningModel, ShowRequest, ShowResponse, StatusResponse,
};
