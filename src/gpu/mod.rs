pub mod context;
pub mod geometry;
pub mod target;
pub mod texture;
pub mod reflect;
pub mod pass;
pub mod chainer;
