//! Record shapes of the dashboard's synchronized tables.

pub mod agenda;
pub mod kpi;
pub mod mural;
pub mod okr;

pub use agenda::AgendaEvent;
pub use kpi::{Kpi, KpiMeasurement};
pub use mural::MuralPost;
pub use okr::{KeyResult, Okr};
