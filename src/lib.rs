pub mod billing;
pub mod clients;
pub mod database_ops;
pub mod error;
pub mod report;

pub mod util {
    pub mod db;
    pub mod env;
    pub mod ids;
    pub mod sql_runner;
}
