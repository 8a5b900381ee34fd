pub mod barcode;
pub mod domain;
pub mod error;
pub mod protocol;
