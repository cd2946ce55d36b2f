//! Step strategies for the agent state machine.
//!
//! [`ToolCallStrategy`] is the ReAct flavor used by the agent service: think
//! with the model, act by executing the tools it asked for.

pub mod tool_call;

pub use tool_call::{NO_TOOLS_NEEDED, ToolCallStrategy};

#[cfg(test)]
pub(crate) mod test_helpers;
