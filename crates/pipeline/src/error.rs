use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("audio error: {0}")]
    Audio(String),

    #[error("tts error: {0}")]
    Tts(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("cache error: {0}")]
    Cache(String),
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Tts(err.to_string())
    }
}

impl From<PipelineError> for answer_pipeline_core::Error {
    fn from(err: PipelineError) -> Self {
        answer_pipeline_core::Error::Pipeline(err.to_string())
    }
}
