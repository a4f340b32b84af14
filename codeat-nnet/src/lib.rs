mod activation;
pub use activation::*;
mod affine;
pub use affine::Affine;
mod cache;
pub use cache::*;
mod code_group;
pub use code_group::*;
mod codeat;
pub use codeat::*;
mod component;
pub use component::*;
mod error;
pub use error::*;
mod loss;
pub use loss::*;
pub mod matrix;
mod nnet;
pub use nnet::*;
mod source;
pub use source::*;
mod train;
pub use train::*;
