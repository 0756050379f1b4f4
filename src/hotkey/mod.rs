//! Global hotkeys: chord parsing, the persisted registry, and the backend
//! adapter that talks to the OS registration primitive.

/// Backend adapter over the native registration API.
pub mod backend;

/// Chord normalization, virtual-key mapping, and the reserved set.
pub mod keys;

/// Persisted name-to-chord registry with conflict rules.
pub mod registry;
