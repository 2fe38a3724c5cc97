//! Binding library: anchor identifier -> [`CompositeBinding`].
//!
//! Anchors receive a [`LibraryHandle`] at construction. Applications normally
//! build one handle at startup and clone it into every anchor; tests and
//! tools can hand each anchor its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::binding::CompositeBinding;
use crate::error::LibraryError;

/// Key-value persistence of composite bindings.
pub trait BindingLibrary: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CompositeBinding>, LibraryError>;

    fn set(&self, key: &str, binding: &CompositeBinding) -> Result<(), LibraryError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), LibraryError>;

    /// Stored identifiers, sorted.
    fn keys(&self) -> Result<Vec<String>, LibraryError>;
}

/// Shared handle to the active library.
pub type LibraryHandle = Arc<dyn BindingLibrary>;

/// Process-lifetime library kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryBindingLibrary {
    entries: Mutex<HashMap<String, CompositeBinding>>,
}

impl InMemoryBindingLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning a ready-to-share handle.
    pub fn shared() -> LibraryHandle {
        Arc::new(Self::new())
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, CompositeBinding>>, LibraryError> {
        self.entries.lock().map_err(|_| LibraryError::Poisoned)
    }
}

impl BindingLibrary for InMemoryBindingLibrary {
    fn get(&self, key: &str) -> Result<Option<CompositeBinding>, LibraryError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, binding: &CompositeBinding) -> Result<(), LibraryError> {
        self.entries()?.insert(key.to_string(), binding.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LibraryError> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, LibraryError> {
        let mut keys: Vec<String> = self.entries()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameStatus, FrameUid, Pose, ReferenceFrame};
    use glam::{Quat, Vec3};
    use pretty_assertions::assert_eq;

    fn sample_binding() -> CompositeBinding {
        let frame = ReferenceFrame::new(
            FrameUid::new_v4(),
            Vec3::new(1.0, 0.0, 0.0),
            Quat::IDENTITY,
            FrameStatus::Recognized,
        );
        CompositeBinding::new(&Pose::IDENTITY, [&frame], 5.0)
    }

    #[test]
    fn get_set_remove() {
        let library = InMemoryBindingLibrary::new();
        let binding = sample_binding();

        assert_eq!(library.get("lamp").ok().flatten(), None);
        library.set("lamp", &binding).expect("set");
        assert_eq!(library.get("lamp").ok().flatten(), Some(binding.clone()));
        assert_eq!(library.keys().unwrap_or_default(), vec!["lamp".to_string()]);

        library.remove("lamp").expect("remove");
        library.remove("lamp").expect("removing twice is fine");
        assert_eq!(library.get("lamp").ok().flatten(), None);
    }

    #[test]
    fn shared_handle_sees_writes_from_clones() {
        let handle = InMemoryBindingLibrary::shared();
        let other = Arc::clone(&handle);
        other.set("chair", &sample_binding()).expect("set");
        assert!(handle.get("chair").ok().flatten().is_some());
    }
}
