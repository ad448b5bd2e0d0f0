mod loss_fn;
mod sigmoid_ce;
mod softmax_ce;

pub use loss_fn::LossFn;
pub use sigmoid_ce::SigmoidCrossEntropy;
pub use softmax_ce::SoftmaxCrossEntropy;
