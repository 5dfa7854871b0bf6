use kestrel_operation::OperationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("node name is required")]
    MissingName,

    #[error("inventory store error: {0}")]
    Store(#[from] OperationError),
}

pub type Result<T> = std::result::Result<T, InventoryError>;
