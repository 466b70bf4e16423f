mod delegate_tool;
mod manager;
mod types;

pub use delegate_tool::{
    DELEGATE_TOOL_NAME, DELEGATION_STATUS_TOOL_NAME, DelegationReport, DelegationRequest,
    Delegator, DelegatorConfig, delegate_tool_descriptor, delegation_status_descriptor,
    register_delegation_tools,
};
pub use manager::{DelegationManager, RECENT_DELEGATION_CAPACITY};
pub use types::{DelegationChain, DelegationStatus, DelegationTask};
