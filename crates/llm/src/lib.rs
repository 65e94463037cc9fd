//! Validator, generator, and prompt-templating adapters for the answer
//! pipeline: the concrete `core::traits::Validator` and `core::traits::
//! Generator` implementations that call out to Gemini-style and
//! OpenAI/Groq-style LLM services.

pub mod error;
pub mod generator;
pub mod prompt;
pub mod validator;

pub use error::LlmError;
pub use generator::{GeneratorConfig, HttpGenerator};
pub use prompt::{render_template, Role};
pub use validator::{GeminiValidator, ValidatorConfig};
