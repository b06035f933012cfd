#![cfg(test)]

pub mod common;
pub mod component_tests;
pub mod runtime_tests;
