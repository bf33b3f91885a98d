pub mod barrier;
pub mod command;
pub mod command_list_pool;
pub mod command_queue;
pub mod fence;
pub mod graphics_context;
