//! Scoped render state

use std::ops::{Deref, DerefMut};

use crate::backend::traits::GraphicsBackend;
use crate::backend::types::RenderState;

/// Applies a [`RenderState`] for the guard's lifetime and restores the previous
/// state when dropped.
///
/// The guard dereferences to the backend, so draws inside the scope go through it:
///
/// ```ignore
/// let mut pass = RenderStateGuard::new(backend, RenderState::fullscreen());
/// pass.draw_fullscreen();
/// // previous state restored here, also on early return
/// ```
pub struct RenderStateGuard<'a> {
    backend: &'a mut dyn GraphicsBackend,
    previous: RenderState,
}

impl<'a> RenderStateGuard<'a> {
    pub fn new(backend: &'a mut dyn GraphicsBackend, state: RenderState) -> Self {
        let previous = backend.render_state();
        backend.apply_render_state(&state);
        Self { backend, previous }
    }

    /// Replace the scoped state without touching the state restored on drop.
    pub fn set(&mut self, state: RenderState) {
        self.backend.apply_render_state(&state);
    }

    pub fn backend(&mut self) -> &mut dyn GraphicsBackend {
        &mut *self.backend
    }
}

impl<'a> Deref for RenderStateGuard<'a> {
    type Target = dyn GraphicsBackend + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.backend
    }
}

impl<'a> DerefMut for RenderStateGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.backend
    }
}

impl Drop for RenderStateGuard<'_> {
    fn drop(&mut self) {
        self.backend.apply_render_state(&self.previous);
    }
}

/// Run `f` with `state` applied, restoring the previous state afterwards.
pub fn with_render_state<R>(
    backend: &mut dyn GraphicsBackend,
    state: RenderState,
    f: impl FnOnce(&mut dyn GraphicsBackend) -> R,
) -> R {
    let mut guard = RenderStateGuard::new(backend, state);
    f(guard.backend())
}
