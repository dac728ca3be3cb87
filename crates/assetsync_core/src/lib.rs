//! Assetsync core: pure operation registry state machine and view-model helpers.
mod effect;
mod msg;
mod state;
mod update;
mod view_model;

pub use effect::Effect;
pub use msg::Msg;
pub use state::{
    Operation, OperationId, OperationKind, OperationSnapshot, OperationStatus, RegistryState,
};
pub use update::update;
pub use view_model::{OperationRowView, RegistryViewModel};
