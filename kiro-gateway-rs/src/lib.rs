//! # kiro-gateway
//!
//! Wire protocol translation and upstream client for the Kiro API (Amazon Q
//! / AWS CodeWhisperer): Anthropic Messages API request/response
//! translation, AWS event-stream framing, and the two upstream token-refresh
//! endpoints.
//!
//! This crate is deliberately credential-agnostic. It has no notion of a
//! credential pool, token store, or selector - those live in the proxy
//! binary that owns this crate, alongside the account(s) actually being
//! proxied. Call [`client::send_messages`]/[`client::send_messages_stream`]
//! with a [`client::CallContext`] borrowing whichever access token the
//! caller has already chosen.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kiro_gateway::api::messages::MessagesRequestBuilder;
//! use kiro_gateway::client::{self, CallContext};
//! use kiro_gateway::convert::ModelResolver;
//! use kiro_gateway::transport::http::KiroHttpClient;
//!
//! #[tokio::main]
//! async fn main() -> kiro_gateway::Result<()> {
//!     let http = KiroHttpClient::new();
//!     let model_resolver = ModelResolver::new()?;
//!
//!     let request = MessagesRequestBuilder::new()
//!         .model("claude-sonnet-4.5")
//!         .max_tokens(1024)
//!         .user_message("Hello, Claude!")
//!         .build();
//!
//!     let ctx = CallContext {
//!         access_token: "...",
//!         fingerprint: "...",
//!         region: "us-east-1",
//!         profile_arn: None,
//!     };
//!
//!     let response = client::send_messages(&http, &model_resolver, &ctx, &request).await?;
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod models;
pub mod transport;

// Re-exports for ergonomic usage
pub use error::{Error, Result};
pub use models::request::{
    ContentBlock, Message, MessageContent, MessagesRequest, Role, SystemPrompt, ThinkingConfig,
    Tool, ToolChoice,
};
pub use models::response::{MessagesResponse, ResponseContentBlock, StopReason, Usage};
pub use models::stream::{ContentDelta, MessageDelta, StreamEvent};
