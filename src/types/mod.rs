//! Wire types shared by the credential core and the provider services.

mod provider;
mod stream;

pub use provider::Provider;
pub use stream::{
    AnthropicDelta, ChatCompletionChunk, ChunkChoice, ChunkDelta, ContentDelta, MessageDeltaData,
    StreamError,
};
