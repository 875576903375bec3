use tracing::debug;

use super::{AnimationState, AnimationType, StateBridge, vanished};
use crate::error::{EntityKind, Error, Result};
use crate::memory::layout::anim;
use crate::memory::{AccessResult, ReadMemory, WriteMemory};

impl StateBridge {
    pub fn get_animation_state(&self, id: u32) -> Result<AnimationState> {
        let _state = self.lock();
        let record = self.require_animation(id)?;
        self.read_animation(record)
            .map_err(|e| vanished(EntityKind::Animation, id, e))
    }

    pub fn current_animation(&self, id: u32) -> Result<AnimationType> {
        Ok(self.get_animation_state(id)?.current)
    }

    /// Start an animation from the beginning.
    ///
    /// Returns `false` without touching anything when the playing animation
    /// cannot be cancelled, unless `force` is set.
    pub fn play_animation(&self, id: u32, animation: AnimationType, force: bool) -> Result<bool> {
        let _state = self.lock();
        let record = self.require_animation(id)?;
        let play = || -> AccessResult<bool> {
            let m = &self.memory;
            let playing = m.read_bool(record + anim::IS_PLAYING)?;
            let cancellable = m.read_bool(record + anim::CAN_CANCEL)?;
            if playing && !cancellable && !force {
                debug!("Character {} is in a non-cancellable animation", id);
                return Ok(false);
            }
            m.write_i32(record + anim::CURRENT, animation.into())?;
            m.write_f32(record + anim::TIME, 0.0)?;
            m.write_f32(record + anim::BLEND_WEIGHT, 1.0)?;
            m.write_bool(record + anim::IS_BLENDING, false)?;
            m.write_bool(record + anim::IS_PLAYING, true)?;
            Ok(true)
        };
        play().map_err(|e| vanished(EntityKind::Animation, id, e))
    }

    /// Mirror a remote animation: same clip, playback time and speed
    pub fn sync_animation(&self, id: u32, animation: AnimationType, time: f32, speed: f32) -> Result<()> {
        let _state = self.lock();
        let record = self.require_animation(id)?;
        let sync = || -> AccessResult<()> {
            let m = &self.memory;
            m.write_i32(record + anim::CURRENT, animation.into())?;
            m.write_f32(record + anim::TIME, time.max(0.0))?;
            m.write_f32(record + anim::SPEED, speed.max(0.0))?;
            m.write_bool(record + anim::IS_PLAYING, true)
        };
        sync().map_err(|e| vanished(EntityKind::Animation, id, e))
    }

    /// Cross-fade into another animation; the host advances the blend weight
    pub fn blend_animation(&self, id: u32, animation: AnimationType) -> Result<()> {
        let _state = self.lock();
        let record = self.require_animation(id)?;
        let blend = || -> AccessResult<()> {
            let m = &self.memory;
            m.write_i32(record + anim::CURRENT, animation.into())?;
            m.write_f32(record + anim::BLEND_WEIGHT, 0.0)?;
            m.write_bool(record + anim::IS_BLENDING, true)?;
            m.write_bool(record + anim::IS_PLAYING, true)
        };
        blend().map_err(|e| vanished(EntityKind::Animation, id, e))
    }

    pub fn stop_animation(&self, id: u32) -> Result<()> {
        let _state = self.lock();
        let record = self.require_animation(id)?;
        self.memory
            .write_bool(record + anim::IS_PLAYING, false)
            .map_err(|e| vanished(EntityKind::Animation, id, e))
    }

    pub fn set_animation_speed(&self, id: u32, speed: f32) -> Result<()> {
        let _state = self.lock();
        let record = self.require_animation(id)?;
        let speed = if speed.is_nan() { 0.0 } else { speed.max(0.0) };
        self.memory
            .write_f32(record + anim::SPEED, speed)
            .map_err(|e| vanished(EntityKind::Animation, id, e))
    }

    pub fn set_animation_looping(&self, id: u32, looping: bool) -> Result<()> {
        let _state = self.lock();
        let record = self.require_animation(id)?;
        self.memory
            .write_bool(record + anim::IS_LOOPING, looping)
            .map_err(|e| vanished(EntityKind::Animation, id, e))
    }

    fn require_animation(&self, id: u32) -> Result<u64> {
        let fields = self.fields().character;
        let record = self.require_character(id)?;
        self.memory
            .read_ptr(record + fields.anim_state)
            .map_err(|e| vanished(EntityKind::Character, id, e))?
            .ok_or_else(|| Error::not_found(EntityKind::Animation, id))
    }

    fn read_animation(&self, record: u64) -> AccessResult<AnimationState> {
        let m = &self.memory;
        Ok(AnimationState {
            current: AnimationType::from_raw(m.read_i32(record + anim::CURRENT)?),
            time: m.read_f32(record + anim::TIME)?,
            speed: m.read_f32(record + anim::SPEED)?,
            blend_weight: m.read_f32(record + anim::BLEND_WEIGHT)?,
            is_playing: m.read_bool(record + anim::IS_PLAYING)?,
            is_looping: m.read_bool(record + anim::IS_LOOPING)?,
            is_blending: m.read_bool(record + anim::IS_BLENDING)?,
            can_cancel: m.read_bool(record + anim::CAN_CANCEL)?,
        })
    }
}
