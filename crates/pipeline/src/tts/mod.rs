pub mod phoneme;
pub mod ssml;
pub mod streamer;
pub mod synthesizer;

pub use phoneme::{CompiledPhonemePattern, PhonemePatternCache};
pub use ssml::{SsmlFormatter, SsmlOutput};
pub use streamer::TtsStreamer;
pub use synthesizer::{AudioBlobStore, CloudTtsConfig, CloudTtsSynthesizer, HttpBlobStore};
