pub mod desc;
pub mod pipeline_state;
pub mod shader_library;
