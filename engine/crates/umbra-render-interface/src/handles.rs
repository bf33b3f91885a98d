slotmap::new_key_type! {
    pub struct GfxBufferHandle;
    pub struct GfxTextureHandle;
}
