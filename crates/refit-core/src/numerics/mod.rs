pub mod fft;
pub mod gemm;
pub mod linalg;
pub mod shaping;

pub use fft::{WaveformFft, interleave_window};
pub use gemm::{FaerGemm, Gemm, GemmBackend, Layout, ReferenceGemm, Transpose};
pub use linalg::{InversionError, invert_column_major};
pub use shaping::{ShapingStage, TransferFunction};
