pub mod support;

mod engine;
