pub mod assignment;
pub mod cost;
pub mod driver;
pub mod incremental;

pub use cost::CostKernel;
pub use driver::{AlignmentReport, ReorderMethod, RmsdConfig, RmsdDriver};
