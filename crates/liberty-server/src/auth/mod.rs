//! Authentication and admission.

pub mod admission;

pub use admission::AdmissionController;
