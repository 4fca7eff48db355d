//! reel - generate animation videos from natural-language requests.
//!
//! A session asks a chat-completions model for scene code, renders it, and
//! feeds render failures back to the model until a video exists or the
//! attempt budget is spent.

pub mod llm;
pub mod renderer;
pub mod session;

pub use llm::{ClientConfig, CompletionClient, LlmError};
pub use renderer::{RenderDiagnostic, RenderError, RenderOutcome, Renderer, RendererConfig};
pub use session::{
    CodeGenerator, SceneRenderer, Session, SessionConfig, SessionError, SessionEvent,
    SessionOutcome,
};
