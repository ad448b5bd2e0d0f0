pub mod activations;
mod differentiable;
pub mod layers;
pub mod loss;
mod mixer;
mod sequential;

pub use differentiable::Differentiable;
pub use mixer::{AddMixer, Mixer};
pub use sequential::Sequential;
