//! Gradle-specific structure discovery, parsing and tasks.

mod artifact;
mod build_file;
mod catalog;
mod jar;
mod structure;

pub use artifact::{ArtifactConfig, ArtifactDownload, Coordinate, MAVEN_CENTRAL};
pub use build_file::{BuildInfo, DeclaredDependency, DependencyRef};
pub use catalog::{LibraryCoordinate, PluginCoordinate, VersionCatalog};
pub use jar::JarPackage;
pub use structure::{GradleRoot, GradleStructure};
