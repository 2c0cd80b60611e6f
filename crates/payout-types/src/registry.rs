//! Registry trait for pluggable backend implementations.

/// Ties a backend implementation to the name it is selected by in
/// configuration (for example `storage.primary = "memory"`) and to the
/// factory that builds it.
pub trait ImplementationRegistry {
	/// Configuration name of the implementation.
	const NAME: &'static str;

	/// Factory function type, defined by the owning crate.
	type Factory;

	fn factory() -> Self::Factory;
}
