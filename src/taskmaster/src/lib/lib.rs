extern crate libq;
extern crate nix;

pub mod api;
pub mod client;
pub mod console;
pub mod error;
pub mod master;
pub mod signals;
pub mod socket;
pub mod supervisor;
pub mod tasks;
