pub mod context;
pub mod tubes;
pub mod logging;
pub mod timer;
pub mod util;
pub mod elf;
pub mod menu;
pub mod leak;
pub mod payload;
pub mod session;
pub mod script;
pub mod house_of_spirit;
pub mod config;
