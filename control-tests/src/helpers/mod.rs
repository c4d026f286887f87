pub mod fake_executables;
pub mod manifest_builder;
pub mod unit_dir_supervisor;
