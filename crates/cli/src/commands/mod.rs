pub mod config_cmd;
pub mod onboard;
pub mod run;
