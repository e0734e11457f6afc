//! Type-erased registry entries.

use crate::error::ResolveError;
use crate::reference::Reference;
use core::any::Any;
use core::fmt;
use std::sync::Arc;
use tenure_lifecycle::factory::SessionFactory;

/// A value stored under a name in a [`Registry`](crate::registry::Registry)
/// or a [`Namespace`](crate::modules::Namespace).
///
/// A definition usually holds a [`SessionFactory`] or a [`Reference`] to
/// one, but any value can be stored. Only factories and references resolve;
/// everything else fails with [`ResolveError::NotAFactory`].
#[derive(Clone)]
pub struct Definition {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Definition {
    /// Wraps a session factory.
    #[must_use]
    pub fn factory<R: Send + Sync + 'static>(factory: SessionFactory<R>) -> Self {
        Self::value(factory)
    }

    /// Wraps a reference; resolving the definition resolves the reference.
    #[must_use]
    pub fn reference<R: Send + Sync + 'static>(reference: Reference<R>) -> Self {
        Self::value(reference)
    }

    /// Wraps an arbitrary value.
    #[must_use]
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: core::any::type_name::<T>(),
        }
    }

    /// Returns the type name of the stored value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the stored value if it has type `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Turns the definition into a factory for `R`.
    ///
    /// A stored [`Reference`] is resolved one more level; there is no cycle
    /// detection.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::NotAFactory`] if the value is neither a
    /// `SessionFactory<R>` nor a `Reference<R>`, or the nested reference's
    /// resolution error.
    pub fn into_factory<R: Send + Sync + 'static>(
        &self,
        target: &str,
    ) -> Result<SessionFactory<R>, ResolveError> {
        if let Some(factory) = self.downcast_ref::<SessionFactory<R>>() {
            return Ok(factory.clone());
        }
        if let Some(reference) = self.downcast_ref::<Reference<R>>() {
            tracing::trace!(name = target, "following nested reference");
            return reference.resolve();
        }
        Err(ResolveError::NotAFactory {
            target: target.to_owned(),
            found: self.type_name,
        })
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("type", &self.type_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_round_trips() {
        let factory = SessionFactory::singleton(Arc::new(3_u8));
        let definition = Definition::factory(factory.clone());
        let resolved = definition.into_factory::<u8>("n").unwrap();
        assert_eq!(resolved.id(), factory.id());
    }

    #[test]
    fn wrong_resource_type_is_not_a_factory() {
        let definition = Definition::factory(SessionFactory::singleton(Arc::new(3_u8)));
        let err = definition.into_factory::<String>("n").unwrap_err();
        assert!(matches!(err, ResolveError::NotAFactory { ref target, .. } if target == "n"));
    }

    #[test]
    fn plain_values_are_not_factories() {
        let definition = Definition::value(String::from("postgres://"));
        assert_eq!(definition.downcast_ref::<String>().unwrap(), "postgres://");
        let err = definition.into_factory::<u8>("dsn").unwrap_err();
        assert!(matches!(err, ResolveError::NotAFactory { found, .. } if found.contains("String")));
    }
}
