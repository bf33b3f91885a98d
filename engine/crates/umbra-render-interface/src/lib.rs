pub mod descriptor_allocator;
pub mod frame_counter;
pub mod gfx_resource_manager;
pub mod handles;
pub mod render_context;
pub mod render_settings;
pub mod resources;
pub mod upload;
