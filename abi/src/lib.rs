#![no_std]

pub mod net;
