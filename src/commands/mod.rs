pub mod doctor;
pub mod dolt;
pub mod guard;
pub mod mail;
pub mod molecule;
pub mod nudge;
pub mod patrol;
pub mod tier;
pub mod witness;
pub mod workers;
