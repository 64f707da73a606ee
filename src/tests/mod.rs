pub mod lib;

mod bridge;
