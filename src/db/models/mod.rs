pub mod exposure;

pub use exposure::ExposureRecord;
