pub mod mock;
pub mod openai;
pub mod reliable;
pub mod sse;

pub use mock::{MockProvider, MockResponse};
pub use openai::{OpenAiCompatProvider, OpenAiConfig};
pub use reliable::{ReliableConfig, ReliableProvider};
