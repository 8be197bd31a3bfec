pub mod flows;
pub mod gateway;
pub mod sessions;
