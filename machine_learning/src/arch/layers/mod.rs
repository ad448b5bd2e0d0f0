mod activation;
mod conv;
mod dense;
mod layer;

pub use activation::Activation;
pub use conv::Conv2d;
pub use dense::Dense;
pub use layer::Layer;
