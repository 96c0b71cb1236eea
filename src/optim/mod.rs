//! Gradient-based parameter updates.

mod adam;

pub use adam::Adam;

use crate::model::ParamSlotMut;

/// Common interface for optimizers operating on named parameter slots.
pub trait Optimizer {
    /// Apply one update step using the gradients stored in each slot.
    fn step(&mut self, params: &mut [ParamSlotMut<'_>]);

    /// Current learning rate.
    fn lr(&self) -> f32;

    /// Update the learning rate.
    fn set_lr(&mut self, lr: f32);
}
