use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("executor transport error: {0}")]
    Transport(String),

    #[error("executor returned invalid output: {0}")]
    InvalidOutput(String),
}
