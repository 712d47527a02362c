use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::channel::{Channel, OverrideVector};
use crate::error::ControlError;
use crate::pwm::Pwm;
use crate::vehicle::Vehicle;

/// Single-holder claim on a vehicle's RC overrides. Clones share the claim, so every handle
/// to the same link sees the same state.
#[derive(Debug, Clone, Default)]
pub struct OverrideLease(Arc<AtomicBool>);

impl OverrideLease {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_claim(&self) -> bool {
        self.0.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    fn release(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Scoped RC override ownership.
///
/// The session releases every channel exactly once when it ends: through [`close`],
/// or on drop for every other exit path (`?`, panics, a cancelled future).
///
/// [`close`]: OverrideSession::close
pub struct OverrideSession<'v, V: Vehicle> {
    vehicle: &'v mut V,
    vector: OverrideVector,
    // the vehicle may still hold something we set
    dirty: bool,
    closed: bool,
}

pub fn begin_overrides<V: Vehicle>(vehicle: &mut V) -> Result<OverrideSession<'_, V>, ControlError> {
    if !vehicle.override_lease().try_claim() {
        return Err(ControlError::OverrideSessionConflict);
    }
    debug!("override session opened");
    Ok(OverrideSession { vehicle, vector: OverrideVector::released(), dirty: false, closed: false })
}

impl<'v, V: Vehicle> OverrideSession<'v, V> {
    pub fn set(&mut self, channel: Channel, value: Option<Pwm>) -> Result<(), ControlError> {
        self.vector.set(channel, value);
        self.dirty = true;
        self.vehicle.set_channel_override(channel, value)?;
        Ok(())
    }

    /// Replace the whole vector in one push.
    pub fn apply(&mut self, vector: &OverrideVector) -> Result<(), ControlError> {
        self.vector = *vector;
        self.dirty = true;
        self.vehicle.apply_overrides(vector)?;
        Ok(())
    }

    /// Release every channel. A no-op when nothing has been set since the last clear.
    pub fn clear_all(&mut self) -> Result<(), ControlError> {
        self.vector.clear();
        if !self.dirty {
            return Ok(());
        }
        self.vehicle.clear_all_overrides()?;
        self.dirty = false;
        Ok(())
    }

    pub fn vector(&self) -> &OverrideVector {
        &self.vector
    }

    pub fn vehicle(&self) -> &V {
        &*self.vehicle
    }

    pub fn vehicle_mut(&mut self) -> &mut V {
        &mut *self.vehicle
    }

    pub fn close(mut self) -> Result<(), ControlError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), ControlError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.vector.clear();
        // unconditional: this is the last chance to leave the vehicle released
        let res = self.vehicle.clear_all_overrides().map_err(ControlError::from);
        self.dirty = res.is_err();
        self.vehicle.override_lease().release();
        debug!("override session closed");
        res
    }
}

impl<'v, V: Vehicle> Drop for OverrideSession<'v, V> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("override session: final clear failed: {}", e);
        }
    }
}
