//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `run`    | `List`, `Run`    |
//! | `config` | `Config`         |

pub mod config;
pub mod run;

pub use config::{cmd_config_init, cmd_config_show, cmd_config_validate};
pub use run::{cmd_list, cmd_run};
