use crate::Result;

/// The `Optimizer` trait is responsible for the transition of parameters from step `t` to `t+1`.
pub trait Optimizer {
    /// Updates the parameters in place using their gradient.
    ///
    /// # Arguments
    /// * `params` - The parameters that are going to be modified.
    /// * `grad` - The gradient of the loss with respect to `params`, index aligned with them.
    ///
    /// # Errors
    /// `SizeMismatch` if `grad` and `params` differ in length.
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()>;
}
