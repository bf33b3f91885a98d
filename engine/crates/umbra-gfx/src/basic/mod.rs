pub mod extent;
pub mod format;
pub mod viewport;
