//! 致命错误的唯一出口
//!
//! 库代码只通过 `?` 传播错误，由应用层在这里记录诊断并结束进程。

use umbra_gfx::error::GfxError;

/// 进程退出码
pub const FATAL_EXIT_CODE: i32 = 1;

/// 诊断信息：GFX 错误给出类别、信息与出错位置，其余错误给出完整的 context 链
pub fn diagnostic(err: &anyhow::Error) -> String {
    match err.downcast_ref::<GfxError>() {
        Some(gfx) => format!(
            "fatal {:?} error: {} at {}:{}",
            gfx.kind(),
            gfx.message(),
            gfx.location().file(),
            gfx.location().line()
        ),
        None => format!("fatal error: {:#}", err),
    }
}

pub fn terminate(err: impl Into<anyhow::Error>) -> ! {
    let err = err.into();
    log::error!("{}", diagnostic(&err));
    log::logger().flush();
    std::process::exit(FATAL_EXIT_CODE)
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use umbra_gfx::error::GfxErrorKind;

    use super::*;

    #[test]
    fn test_gfx_diagnostic_names_location() {
        let line = line!() + 1;
        let err = GfxError::shader_not_found("lighting.ps.spv");
        assert_eq!(err.kind(), GfxErrorKind::ShaderNotFound);

        let text = diagnostic(&anyhow::Error::from(err));
        assert!(text.contains("ShaderNotFound"), "{}", text);
        assert!(text.contains("lighting.ps.spv"), "{}", text);
        assert!(text.contains(&format!("fatal.rs:{}", line)), "{}", text);
    }

    #[test]
    fn test_context_chain_is_kept() {
        let err = std::fs::read_to_string("/definitely/not/here.toml")
            .context("failed to read config")
            .unwrap_err();
        let text = diagnostic(&err);
        assert!(text.starts_with("fatal error: failed to read config: "), "{}", text);
    }
}
