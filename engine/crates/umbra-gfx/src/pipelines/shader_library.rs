use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::error::{GfxError, GfxResult};

enum ShaderSource {
    /// 目录下的 `<name>.spv`
    Directory(PathBuf),
    /// 内存中的着色器表
    Memory(HashMap<String, Arc<[u8]>>),
    /// 任意名字都返回一段占位字节，只给 headless 后端使用
    Synthetic,
}

/// 着色器二进制的来源
///
/// 找不到的着色器返回 `ShaderNotFound`。
pub struct ShaderLibrary {
    source: ShaderSource,
}

// new & init
impl ShaderLibrary {
    pub fn directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            source: ShaderSource::Directory(dir.into()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            source: ShaderSource::Memory(HashMap::new()),
        }
    }

    pub fn synthetic() -> Self {
        Self {
            source: ShaderSource::Synthetic,
        }
    }

    /// 只对内存着色器表有效
    pub fn insert(&mut self, name: impl Into<String>, blob: impl Into<Arc<[u8]>>) {
        match &mut self.source {
            ShaderSource::Memory(table) => {
                table.insert(name.into(), blob.into());
            }
            _ => log::warn!("ShaderLibrary::insert ignored: not an in-memory library"),
        }
    }
}

// tools
impl ShaderLibrary {
    /// `name` 形如 `lighting.ps`，目录模式下对应 `lighting.ps.spv`
    pub fn load(&self, name: &str) -> GfxResult<Arc<[u8]>> {
        match &self.source {
            ShaderSource::Directory(dir) => {
                let path = Self::blob_path(dir, name);
                std::fs::read(&path)
                    .map(Arc::from)
                    .map_err(|err| GfxError::shader_not_found(format!("{}: {}", path.display(), err)))
            }
            ShaderSource::Memory(table) => {
                table.get(name).cloned().ok_or_else(|| GfxError::shader_not_found(format!("{} (in-memory)", name)))
            }
            ShaderSource::Synthetic => Ok(Arc::from(name.as_bytes())),
        }
    }

    fn blob_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.spv", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GfxErrorKind;

    #[test]
    fn test_missing_shader_in_directory() {
        let library = ShaderLibrary::directory(std::env::temp_dir().join("umbra-no-such-shader-dir"));
        let err = library.load("lighting.ps").unwrap_err();
        assert_eq!(err.kind(), GfxErrorKind::ShaderNotFound);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_in_memory_lookup() {
        let mut library = ShaderLibrary::in_memory();
        library.insert("post.ps", vec![1u8, 2, 3]);
        assert_eq!(&*library.load("post.ps").unwrap(), &[1, 2, 3]);
        assert_eq!(library.load("post.vs").unwrap_err().kind(), GfxErrorKind::ShaderNotFound);
    }

    #[test]
    fn test_directory_lookup() {
        let dir = std::env::temp_dir().join(format!("umbra-shader-lib-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("sky.vs.spv"), [7u8; 8]).unwrap();

        let library = ShaderLibrary::directory(&dir);
        assert_eq!(library.load("sky.vs").unwrap().len(), 8);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
