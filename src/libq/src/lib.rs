extern crate nix;

pub mod daemon;
pub mod io;
pub mod logger;
pub mod qnix;
pub mod strings;
