pub mod common;
pub mod composite;
pub mod fit_settings;
pub mod models;
pub mod numdiff;
pub mod optimizer;
pub mod report;
pub mod roi;
pub mod smoothing;
pub mod uncertainty;
