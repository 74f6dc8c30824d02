use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetaStackError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetaStackError {
    /// A stack element string did not parse, e.g. `lowest_own`.
    #[error("Invalid meta stack element: {0:?}")]
    InvalidElement(String),
}
