pub mod composite_pass;
pub mod depth_copy_pass;
pub mod geometry_pass;
pub mod lighting_pass;
pub mod post_process_pass;
pub mod shadow_pass;
