//! Concrete engine and persistence bindings for `duopdf-core`: pdfium for
//! parsing and painting, lopdf for reading and writing native annotations.

pub mod catalog;
pub mod persist;
#[cfg(feature = "pdf")]
mod pdfium;

pub use catalog::named_destinations;
pub use persist::LopdfPersistence;
#[cfg(feature = "pdf")]
pub use pdfium::{PdfiumEngine, PDFIUM_LIBRARY_ENV};
