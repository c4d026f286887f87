//! Test utilities for the control workspace
//!
//! Builders for `control.yaml` manifests, fake executables on disk and a
//! supervisor that manages real unit files in a temporary directory.

pub mod helpers;

pub use helpers::fake_executables::FakeExecutables;
pub use helpers::manifest_builder::{TestManifestBuilder, TestServiceBuilder};
pub use helpers::unit_dir_supervisor::UnitDirSupervisor;
