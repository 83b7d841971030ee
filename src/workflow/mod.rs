pub mod run;
pub mod schedule;
pub mod server;

pub use run::run_once;
pub use schedule::run_daily;
pub use server::serve;
