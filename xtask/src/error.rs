use thiserror::Error;

pub type Result<T> = std::result::Result<T, XtaskError>;

#[derive(Debug, Error)]
pub enum XtaskError {
    #[error("{0}")]
    Message(String),

    #[error("{desc} failed (exit code {code:?})")]
    CommandFailure { desc: String, code: Option<i32> },
}
