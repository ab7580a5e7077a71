pub mod exposures;

pub use exposures::EXPOSURE_COLUMNS;
