//! The concrete change catalog: one module per mutation family.

pub mod discontinuous;
pub mod location;
pub mod strand;
pub mod structural;
