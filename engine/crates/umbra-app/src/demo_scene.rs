//! 内置的演示场景：地面、一个旋转的立方体、绕行的点光源和纯色天空盒

use std::time::Duration;

use glam::{Mat4, Quat, Vec3};
use umbra_gfx::{
    basic::{extent::GfxExtent2D, format::GfxFormat},
    error::GfxResult,
    resources::{GfxResourceDesc, GfxResourceUsage},
};
use umbra_render_interface::{handles::GfxTextureHandle, render_context::RenderContext};
use umbra_renderer::scene::{PointLight, SceneMesh, SceneObject, SceneView};

use crate::outer_app::OuterApp;

/// shader 通过 bindless 索引读取的顶点布局
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DemoVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

const CHECKER_SIZE: u32 = 4;
const LIGHT_COLORS: [Vec3; 3] = [Vec3::new(1.0, 0.4, 0.3), Vec3::new(0.3, 1.0, 0.4), Vec3::new(0.3, 0.5, 1.0)];

#[derive(Default)]
pub struct DemoApp {
    elapsed: f32,
    cube_object: usize,
}

impl OuterApp for DemoApp {
    fn init(&mut self, rc: &mut RenderContext) -> GfxResult<SceneView> {
        let _span = tracy_client::span!("DemoApp::init");
        log::info!("demo scene init.");

        let (cube_vertices, cube_indices) = cube();
        let (plane_vertices, plane_indices) = plane(20.0);
        let cube = upload_mesh(rc, "cube", &cube_vertices, &cube_indices)?;
        let ground = upload_mesh(rc, "ground", &plane_vertices, &plane_indices)?;
        let checker = checker_texture(rc)?;
        let sky = solid_texture(rc, "sky", [110, 150, 210, 255])?;

        self.elapsed = 0.0;
        self.cube_object = 1;
        let mut scene = SceneView {
            meshes: vec![ground, cube],
            objects: vec![
                SceneObject {
                    mesh: 0,
                    transform: Mat4::IDENTITY,
                    albedo: Some(checker),
                    metallic: 0.0,
                    roughness: 0.9,
                    emissive: 0.0,
                },
                SceneObject {
                    mesh: 1,
                    transform: Mat4::IDENTITY,
                    albedo: None,
                    metallic: 0.8,
                    roughness: 0.3,
                    emissive: 0.0,
                },
            ],
            point_lights: LIGHT_COLORS
                .iter()
                .map(|color| PointLight {
                    position: Vec3::ZERO,
                    radius: 6.0,
                    color: *color,
                    intensity: 4.0,
                })
                .collect(),
            skybox: Some(sky),
            environment: Some(sky),
            ..Default::default()
        };
        self.animate(&mut scene);
        Ok(scene)
    }

    fn update(&mut self, scene: &mut SceneView, delta: Duration) {
        self.elapsed += delta.as_secs_f32();
        self.animate(scene);
    }

    fn on_window_resized(&mut self, _scene: &mut SceneView, extent: GfxExtent2D) {
        log::debug!("demo scene sees {}", extent);
    }
}

impl DemoApp {
    fn animate(&self, scene: &mut SceneView) {
        let t = self.elapsed;
        if let Some(cube) = scene.objects.get_mut(self.cube_object) {
            cube.transform = Mat4::from_rotation_translation(Quat::from_rotation_y(t * 0.8), Vec3::new(0.0, 1.0, 0.0));
        }

        let count = scene.point_lights.len().max(1) as f32;
        for (idx, light) in scene.point_lights.iter_mut().enumerate() {
            let angle = t * 0.5 + idx as f32 * std::f32::consts::TAU / count;
            light.position = Vec3::new(angle.cos() * 3.0, 1.5, angle.sin() * 3.0);
        }
    }
}

fn upload_mesh(rc: &mut RenderContext, name: &str, vertices: &[DemoVertex], indices: &[u32]) -> GfxResult<SceneMesh> {
    let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
    let index_bytes: &[u8] = bytemuck::cast_slice(indices);
    let vertices = rc.create_buffer(
        &GfxResourceDesc::buffer(
            vertex_bytes.len() as u64,
            GfxResourceUsage::SHADER_RESOURCE,
            format!("{}-vertices", name),
        ),
        vertex_bytes,
    )?;
    let indices = rc.create_buffer(
        &GfxResourceDesc::buffer(index_bytes.len() as u64, GfxResourceUsage::INDEX, format!("{}-indices", name)),
        index_bytes,
    )?;
    Ok(SceneMesh {
        vertices,
        indices,
        index_count: (index_bytes.len() / size_of::<u32>()) as u32,
    })
}

fn checker_texture(rc: &mut RenderContext) -> GfxResult<GfxTextureHandle> {
    let pixels: Vec<u8> = (0..CHECKER_SIZE * CHECKER_SIZE)
        .flat_map(|i| {
            let (x, y) = (i % CHECKER_SIZE, i / CHECKER_SIZE);
            if (x + y) % 2 == 0 { [220, 220, 220, 255] } else { [60, 60, 60, 255] }
        })
        .collect();
    let desc = GfxResourceDesc::texture_2d(
        GfxExtent2D::new(CHECKER_SIZE, CHECKER_SIZE),
        GfxFormat::Rgba8Unorm,
        GfxResourceUsage::SHADER_RESOURCE,
        "checker",
    );
    rc.create_texture(&desc, &pixels)
}

fn solid_texture(rc: &mut RenderContext, name: &str, rgba: [u8; 4]) -> GfxResult<GfxTextureHandle> {
    let desc = GfxResourceDesc::texture_2d(
        GfxExtent2D::new(1, 1),
        GfxFormat::Rgba8Unorm,
        GfxResourceUsage::SHADER_RESOURCE,
        name,
    );
    rc.create_texture(&desc, &rgba)
}

/// 边长为 1 的立方体，每个面 4 个顶点
fn cube() -> (Vec<DemoVertex>, Vec<u32>) {
    let normals = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for n in normals {
        let u = if n.y.abs() > 0.5 { Vec3::X } else { Vec3::Y.cross(n) };
        let v = n.cross(u);
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let p = (n + u * su + v * sv) * 0.5;
            vertices.push(DemoVertex {
                position: p.to_array(),
                normal: n.to_array(),
                uv: [(su + 1.0) * 0.5, (sv + 1.0) * 0.5],
            });
        }
        indices.extend([0, 1, 2, 0, 2, 3].map(|i| base + i));
    }
    (vertices, indices)
}

fn plane(size: f32) -> (Vec<DemoVertex>, Vec<u32>) {
    let h = size * 0.5;
    let vertices = [(-h, -h, 0.0, 0.0), (h, -h, 1.0, 0.0), (h, h, 1.0, 1.0), (-h, h, 0.0, 1.0)]
        .map(|(x, z, u, v)| DemoVertex {
            position: [x, 0.0, z],
            normal: [0.0, 1.0, 0.0],
            uv: [u * size, v * size],
        })
        .to_vec();
    (vertices, vec![0, 2, 1, 0, 3, 2])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use umbra_gfx::{
        backend::headless::{HeadlessDevice, HeadlessExecutionMode},
        pipelines::shader_library::ShaderLibrary,
    };
    use umbra_render_interface::render_settings::RenderSettings;

    use super::*;

    #[test]
    fn test_cube_geometry() {
        let (vertices, indices) = cube();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|i| (*i as usize) < vertices.len()));
        assert!(vertices.iter().all(|v| v.position.iter().all(|c| c.abs() <= 0.5 + 1e-5)));
    }

    #[test]
    fn test_init_and_animate() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut rc =
            RenderContext::new(device.clone(), RenderSettings::default(), Arc::new(ShaderLibrary::synthetic())).unwrap();

        let mut app = DemoApp::default();
        let mut scene = app.init(&mut rc).unwrap();
        assert_eq!(scene.meshes.len(), 2);
        assert_eq!(scene.meshes[1].index_count, 36);
        assert_eq!(scene.drawables().count(), 2);
        assert_eq!(scene.active_point_lights().len(), LIGHT_COLORS.len());

        let before = scene.objects[1].transform;
        app.update(&mut scene, Duration::from_millis(500));
        assert_ne!(scene.objects[1].transform, before);
        assert_eq!(scene.objects[0].transform, Mat4::IDENTITY);

        rc.destroy().unwrap();
        assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());
    }
}
