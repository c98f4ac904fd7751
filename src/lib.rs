pub mod batcher;
pub mod cell;
pub mod corpus;
pub mod errors;
pub mod evaluation;
pub mod job;
pub mod model;
pub mod params;
pub mod prep;
pub mod schedule;
pub mod start;
pub mod tokenizer;
pub mod trainer;
pub mod vocab;

pub use errors::{Result, RnnLmError};
pub use evaluation::{Performance, TimeSeries};
pub use job::{prepare, run, PreparedRun};
pub use model::{RnnLm, RnnLmConfig};
pub use params::{EvalConfig, ExperimentConfig, Params};
pub use prep::{Prep, PrepConfig, Windows};

// Re-export essential types for convenience
pub use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};

pub use burn::backend::Autodiff;

#[cfg(feature = "cuda")]
pub use burn::backend::cuda::CudaDevice;
#[cfg(feature = "cuda")]
pub use burn::backend::Cuda;

#[cfg(feature = "wgpu")]
pub use burn::backend::wgpu::{Wgpu, WgpuDevice};

#[cfg(feature = "tch")]
pub use burn::backend::libtorch::{LibTorch, LibTorchDevice};

#[cfg(feature = "candle")]
pub use burn::backend::candle::{Candle, CandleDevice};

#[cfg(feature = "ndarray")]
pub use burn::backend::ndarray::{NdArray, NdArrayDevice};

// Only one backend is active, by priority: cuda > wgpu > tch > candle > ndarray

// CUDA backend (highest priority)
#[cfg(feature = "cuda")]
pub type RawBackend = Cuda<f32>;
#[cfg(feature = "cuda")]
pub type BackendDevice = CudaDevice;
#[cfg(feature = "cuda")]
pub const BACKEND_NAME: &str = if cfg!(feature = "fusion") { "cuda-fusion" } else { "cuda" };

// WGPU backend
#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
pub type RawBackend = Wgpu<f32, i32>;
#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
pub type BackendDevice = WgpuDevice;
#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
pub const BACKEND_NAME: &str = if cfg!(feature = "fusion") { "wgpu-fusion" } else { "wgpu" };

// LibTorch backend
#[cfg(all(feature = "tch", not(any(feature = "cuda", feature = "wgpu"))))]
pub type RawBackend = LibTorch<f32>;
#[cfg(all(feature = "tch", not(any(feature = "cuda", feature = "wgpu"))))]
pub type BackendDevice = LibTorchDevice;
#[cfg(all(feature = "tch", not(any(feature = "cuda", feature = "wgpu"))))]
pub const BACKEND_NAME: &str = "libtorch";

// Candle backend
#[cfg(all(feature = "candle", not(any(feature = "cuda", feature = "wgpu", feature = "tch"))))]
pub type RawBackend = Candle<f32>;
#[cfg(all(feature = "candle", not(any(feature = "cuda", feature = "wgpu", feature = "tch"))))]
pub type BackendDevice = CandleDevice;
#[cfg(all(feature = "candle", not(any(feature = "cuda", feature = "wgpu", feature = "tch"))))]
pub const BACKEND_NAME: &str = "candle";

// NdArray backend (lowest priority)
#[cfg(all(feature = "ndarray", not(any(feature = "cuda", feature = "wgpu", feature = "tch", feature = "candle"))))]
pub type RawBackend = NdArray<f32>;
#[cfg(all(feature = "ndarray", not(any(feature = "cuda", feature = "wgpu", feature = "tch", feature = "candle"))))]
pub type BackendDevice = NdArrayDevice;
#[cfg(all(feature = "ndarray", not(any(feature = "cuda", feature = "wgpu", feature = "tch", feature = "candle"))))]
pub const BACKEND_NAME: &str = "ndarray";

#[cfg(not(any(
    feature = "cuda",
    feature = "wgpu",
    feature = "tch",
    feature = "candle",
    feature = "ndarray"
)))]
compile_error!("At least one backend feature must be enabled: 'cuda', 'wgpu', 'tch', 'candle', or 'ndarray'");

/// Backend every training run differentiates through
pub type TrainBackend = Autodiff<RawBackend>;
