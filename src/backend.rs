use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;

#[cfg(feature = "dev-f16")]
pub type Element = burn::tensor::f16;
#[cfg(not(feature = "dev-f16"))]
pub type Element = f32;

#[cfg(feature = "dev-ndarray")]
pub type MainBackend = burn::backend::NdArray<Element, i32>;
#[cfg(all(
    not(feature = "dev-ndarray"),
    any(feature = "dev-tch-cpu", feature = "dev-tch-gpu")
))]
pub type MainBackend = burn::backend::libtorch::LibTorch<Element, i32>;
#[cfg(all(
    not(any(feature = "dev-ndarray", feature = "dev-tch-cpu", feature = "dev-tch-gpu")),
    feature = "dev-wgpu"
))]
pub type MainBackend = burn::backend::wgpu::Wgpu<Element, i32>;
#[cfg(all(
    not(any(
        feature = "dev-ndarray",
        feature = "dev-tch-cpu",
        feature = "dev-tch-gpu",
        feature = "dev-wgpu"
    )),
    feature = "dev-cuda"
))]
pub type MainBackend = burn::backend::Cuda<Element, i32>;

/// Recorder used for every weight and optimizer file in the model directory.
pub type RecorderTy = NamedMpkFileRecorder<FullPrecisionSettings>;

pub trait MainDevice: Backend {
    fn main_device() -> <Self as Backend>::Device {
        Default::default()
    }
}

#[cfg(any(
    feature = "dev-ndarray",
    feature = "dev-tch-cpu",
    feature = "dev-wgpu",
    feature = "dev-cuda"
))]
impl MainDevice for MainBackend {}
#[cfg(all(
    feature = "dev-tch-gpu",
    not(any(feature = "dev-ndarray", feature = "dev-tch-cpu", feature = "dev-wgpu", feature = "dev-cuda")),
    not(target_os = "macos")
))]
impl MainDevice for MainBackend {
    fn main_device() -> <Self as Backend>::Device {
        burn::backend::libtorch::LibTorchDevice::Cuda(0)
    }
}
#[cfg(all(
    feature = "dev-tch-gpu",
    not(any(feature = "dev-ndarray", feature = "dev-tch-cpu", feature = "dev-wgpu", feature = "dev-cuda")),
    target_os = "macos"
))]
impl MainDevice for MainBackend {
    fn main_device() -> <Self as Backend>::Device {
        burn::backend::libtorch::LibTorchDevice::Mps
    }
}

pub type MainAutoBackend = burn::backend::Autodiff<MainBackend>;
impl MainDevice for MainAutoBackend {
    fn main_device() -> <Self as Backend>::Device {
        <<Self as AutodiffBackend>::InnerBackend as MainDevice>::main_device()
    }
}

#[cfg(not(feature = "_dev-has-backend"))]
mod err {
    use super::*;
    std::compile_error!("No dev backend selected. Please check lenet-mnist/Cargo.toml for more info.");

    // pretend to fallback to ndarray (to avoid too many other unrelated errors)
    pub type MainBackend = burn::backend::NdArray<Element, i32>;
    impl MainDevice for MainBackend {}
}
#[cfg(not(feature = "_dev-has-backend"))]
pub use err::*;
