//! 每帧交给管线的场景快照，以及写入 GPU 的常量布局
//!
//! 场景本身由上层持有；管线只读取它并把需要的数据打包成 per-frame 常量与 root constants。

use glam::{Mat4, Vec3};
use umbra_gfx::{basic::extent::GfxExtent2D, commands::command::GFX_INVALID_INDEX};
use umbra_render_interface::handles::{GfxBufferHandle, GfxTextureHandle};

/// 同时参与着色的点光源上限
pub const MAX_POINT_LIGHTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    /// 垂直方向的视角，弧度
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 6.0),
            target: Vec3::ZERO,
            fov_y: 60_f32.to_radians(),
            near: 0.1,
            far: 200.0,
        }
    }
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, up_for(self.target - self.position))
    }

    pub fn projection(&self, extent: GfxExtent2D) -> Mat4 {
        let aspect = if extent.is_empty() { 1.0 } else { extent.aspect_ratio() };
        Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far)
    }
}

/// 投射阴影的方向光
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// 光线传播的方向
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    /// 阴影正交投影覆盖的半径
    pub shadow_radius: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.4, -1.0, -0.3),
            color: Vec3::ONE,
            intensity: 3.0,
            shadow_radius: 20.0,
        }
    }
}

impl DirectionalLight {
    /// 从光源方向看向原点的 view-projection
    pub fn view_projection(&self) -> Mat4 {
        let dir = self.direction.normalize_or_zero();
        let dir = if dir == Vec3::ZERO { Vec3::NEG_Y } else { dir };
        let r = self.shadow_radius;
        let eye = -dir * r * 2.0;
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, up_for(dir));
        let proj = Mat4::orthographic_rh(-r, r, -r, r, 0.1, r * 4.0);
        proj * view
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub radius: f32,
    pub color: Vec3,
    pub intensity: f32,
}

/// 已经上传到 GPU 的网格
///
/// 顶点在 shader 中通过 bindless 索引读取，index 固定为 u32。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneMesh {
    pub vertices: GfxBufferHandle,
    pub indices: GfxBufferHandle,
    pub index_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneObject {
    /// [`SceneView::meshes`] 中的序号
    pub mesh: usize,
    pub transform: Mat4,
    pub albedo: Option<GfxTextureHandle>,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SceneView {
    pub camera: Camera,
    pub sun: DirectionalLight,
    pub point_lights: Vec<PointLight>,

    pub meshes: Vec<SceneMesh>,
    pub objects: Vec<SceneObject>,

    pub skybox: Option<GfxTextureHandle>,
    /// 漫反射环境光照使用的 irradiance 贴图
    pub environment: Option<GfxTextureHandle>,
}

impl SceneView {
    /// 对象与其网格；引用了不存在网格的对象会被跳过
    pub fn drawables(&self) -> impl Iterator<Item = (&SceneObject, &SceneMesh)> + '_ {
        self.objects.iter().filter_map(|object| self.meshes.get(object.mesh).map(|mesh| (object, mesh)))
    }

    /// 参与着色的点光源，超过上限的部分被截断
    pub fn active_point_lights(&self) -> &[PointLight] {
        let count = self.point_lights.len().min(MAX_POINT_LIGHTS);
        &self.point_lights[..count]
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuPointLight {
    /// xyz: 位置，w: 半径
    pub position_radius: [f32; 4],
    /// xyz: 颜色，w: 强度
    pub color_intensity: [f32; 4],
}

/// 每帧一份的常量缓冲区，shader 通过 CBV 的 bindless 索引访问
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameConstants {
    pub view: [f32; 16],
    pub projection: [f32; 16],
    pub view_projection: [f32; 16],
    pub inv_view_projection: [f32; 16],
    pub light_view_projection: [f32; 16],

    pub camera_position: [f32; 4],
    /// xyz: 方向光的传播方向
    pub sun_direction: [f32; 4],
    /// xyz: 颜色，w: 强度
    pub sun_color: [f32; 4],

    pub extent: [f32; 2],
    pub exposure: f32,
    pub point_light_count: u32,

    pub frame_id: u32,
    pub shadow_map_size: u32,
    pub _padding: [u32; 2],

    pub point_lights: [GpuPointLight; MAX_POINT_LIGHTS],
}

impl FrameConstants {
    pub fn new(scene: &SceneView, extent: GfxExtent2D, exposure: f32, frame_id: u64, shadow_map_size: u32) -> Self {
        let view = scene.camera.view();
        let projection = scene.camera.projection(extent);
        let view_projection = projection * view;

        let lights = scene.active_point_lights();
        let mut point_lights = [GpuPointLight::default(); MAX_POINT_LIGHTS];
        for (gpu, light) in point_lights.iter_mut().zip(lights) {
            *gpu = GpuPointLight {
                position_radius: light.position.extend(light.radius).to_array(),
                color_intensity: light.color.extend(light.intensity).to_array(),
            };
        }

        Self {
            view: view.to_cols_array(),
            projection: projection.to_cols_array(),
            view_projection: view_projection.to_cols_array(),
            inv_view_projection: view_projection.inverse().to_cols_array(),
            light_view_projection: scene.sun.view_projection().to_cols_array(),
            camera_position: scene.camera.position.extend(1.0).to_array(),
            sun_direction: scene.sun.direction.normalize_or_zero().extend(0.0).to_array(),
            sun_color: scene.sun.color.extend(scene.sun.intensity).to_array(),
            extent: [extent.width as f32, extent.height as f32],
            exposure,
            point_light_count: lights.len() as u32,
            frame_id: frame_id as u32,
            shadow_map_size,
            _padding: [0; 2],
            point_lights,
        }
    }
}

/// geometry 与 shadow pass 中每个 draw 的 root constants
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawConstants {
    pub model: [f32; 16],
    pub frame_constants: u32,
    pub vertex_buffer: u32,
    pub albedo_texture: u32,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: f32,
    pub _padding: [u32; 2],
}

impl DrawConstants {
    pub fn new(object: &SceneObject, frame_constants: u32, vertex_buffer: u32, albedo_texture: Option<u32>) -> Self {
        Self {
            model: object.transform.to_cols_array(),
            frame_constants,
            vertex_buffer,
            albedo_texture: albedo_texture.unwrap_or(GFX_INVALID_INDEX),
            metallic: object.metallic,
            roughness: object.roughness,
            emissive: object.emissive,
            _padding: [0; 2],
        }
    }
}

/// 视线方向接近竖直时换一个 up 向量，避免 look_at 退化
fn up_for(forward: Vec3) -> Vec3 {
    if forward.normalize_or_zero().y.abs() > 0.99 { Vec3::Z } else { Vec3::Y }
}

#[cfg(test)]
mod tests {
    use umbra_gfx::commands::command::GFX_MAX_ROOT_CONSTANTS;

    use super::*;

    #[test]
    fn test_draw_constants_fit_root_constants() {
        assert!(size_of::<DrawConstants>() <= GFX_MAX_ROOT_CONSTANTS * 4);
        assert_eq!(size_of::<DrawConstants>() % 4, 0);
    }

    #[test]
    fn test_point_lights_are_truncated() {
        let scene = SceneView {
            point_lights: vec![
                PointLight {
                    position: Vec3::ONE,
                    radius: 1.0,
                    color: Vec3::X,
                    intensity: 2.0,
                };
                MAX_POINT_LIGHTS + 3
            ],
            ..Default::default()
        };
        let constants = FrameConstants::new(&scene, GfxExtent2D::new(16, 9), 1.5, 7, 2048);
        assert_eq!(constants.point_light_count as usize, MAX_POINT_LIGHTS);
        assert_eq!(constants.point_lights[0].color_intensity, [1.0, 0.0, 0.0, 2.0]);
        assert_eq!(constants.exposure, 1.5);
        assert_eq!(constants.extent, [16.0, 9.0]);
    }

    #[test]
    fn test_straight_down_sun_is_finite() {
        let sun = DirectionalLight {
            direction: Vec3::NEG_Y,
            ..Default::default()
        };
        assert!(sun.view_projection().is_finite());
    }
}
