//! Built-in tools for Stepwise loops.
//!
//! A deliberately small set: arithmetic, the current time, and a
//! state-aware report on the running loop. Applications register their own
//! tools alongside these.

pub mod calculator;
pub mod clock;
pub mod step_report;

use std::sync::Arc;

use stepwise_core::tool::ToolRegistry;

pub use calculator::CalculatorTool;
pub use clock::CurrentTimeTool;
pub use step_report::StepReportTool;

/// A registry holding every built-in tool.
pub fn default_registry() -> ToolRegistry {
    ToolRegistry::new()
        .with(Arc::new(CalculatorTool))
        .with(Arc::new(CurrentTimeTool))
        .with(Arc::new(StepReportTool))
}
