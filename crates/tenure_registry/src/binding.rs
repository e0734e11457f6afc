//! Per-owner references.
//!
//! A component type that depends on a resource declares a shared template
//! reference, and each component value carries a [`BoundRef`] field. The
//! first access copies the template into the field; from then on the owner
//! can [`bind()`](BoundRef::bind) its copy to another target without touching
//! the template or other owners.

use crate::reference::{Reference, Target};
use core::fmt;
use std::sync::{Arc, OnceLock};

/// An owner's lazily created copy of a template [`Reference`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tenure_lifecycle::factory::SessionFactory;
/// use tenure_registry::prelude::*;
///
/// struct Repository {
///     db: BoundRef<&'static str>,
/// }
///
/// let template = Arc::new(Reference::from(SessionFactory::singleton(Arc::new("primary"))));
/// let a = Repository { db: BoundRef::new(Arc::clone(&template)) };
/// let b = Repository { db: BoundRef::new(Arc::clone(&template)) };
///
/// b.db.bind(SessionFactory::singleton(Arc::new("replica")));
///
/// let read = |repo: &Repository| repo.db.get().scope(|db| Ok::<_, Error>(**db)).unwrap();
/// assert_eq!(read(&a), "primary");
/// assert_eq!(read(&b), "replica");
/// ```
pub struct BoundRef<R: Send + Sync + 'static> {
    template: Arc<Reference<R>>,
    bound: OnceLock<Reference<R>>,
}

impl<R: Send + Sync + 'static> BoundRef<R> {
    /// Creates an unbound field over a template.
    #[must_use]
    pub fn new(template: Arc<Reference<R>>) -> Self {
        Self {
            template,
            bound: OnceLock::new(),
        }
    }

    /// Returns this owner's reference, copying the template on first access.
    pub fn get(&self) -> &Reference<R> {
        self.bound.get_or_init(|| self.template.copy())
    }

    /// Points this owner's reference at a new target.
    pub fn bind(&self, target: impl Into<Target<R>>) {
        self.get().rebind(target);
    }

    /// Returns `true` once this owner has its own copy.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.bound.get().is_some()
    }

    /// Returns the shared template.
    #[must_use]
    pub fn template(&self) -> &Arc<Reference<R>> {
        &self.template
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for BoundRef<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundRef")
            .field("bound", &self.bound.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn copy_is_lazy_and_per_owner() {
        let registry = Arc::new(Registry::new());
        registry.register_singleton("db", Arc::new(1_u8)).unwrap();
        let template = Arc::new(registry.get::<u8>("db"));

        let owner = BoundRef::new(Arc::clone(&template));
        assert!(!owner.is_bound());

        owner.get().resolve().unwrap();
        assert!(owner.is_bound());
        assert!(owner.get().is_resolved());
        // Resolving the copy leaves the template untouched.
        assert!(!template.is_resolved());
        assert!(Arc::ptr_eq(owner.template(), &template));
    }

    #[test]
    fn bind_by_name_uses_template_registry() {
        let registry = Arc::new(Registry::new());
        registry.register_singleton("primary", Arc::new(1_u8)).unwrap();
        registry.register_singleton("replica", Arc::new(2_u8)).unwrap();
        let template = Arc::new(registry.get::<u8>("primary"));

        let owner = BoundRef::new(template);
        owner.bind("replica");
        let value = owner.get().resolve().unwrap();
        assert_eq!(
            value
                .scope(|v| Ok::<_, tenure_lifecycle::error::LifecycleError>(**v))
                .unwrap(),
            2
        );
    }
}
