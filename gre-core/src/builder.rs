//! Document-to-XML builders and their lookup by document type.
mod despatch;
pub(crate) mod constants;
mod writer;

pub use despatch::DespatchBuilder;

use crate::{
    config::BuilderOptions,
    document::{Despatch, Document},
};
use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::Arc,
};
use thiserror::Error;

/// Errors raised while resolving or running an XML builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    #[error("no XML builder registered for document type {type_name}")]
    NotFound { type_name: &'static str },
    #[error("XML builder received a document that is not a {expected}")]
    TypeMismatch { expected: &'static str },
    #[error("failed to write XML: {0}")]
    Xml(String),
}

/// Strategy that renders one document type to unsigned XML.
pub trait XmlBuilder<D: Document>: Send + Sync {
    fn build(&self, document: &D, options: &BuilderOptions) -> Result<String, BuilderError>;
}

trait ErasedBuilder: Send + Sync {
    fn build_any(&self, document: &dyn Any, options: &BuilderOptions)
        -> Result<String, BuilderError>;
}

struct Typed<D, B> {
    builder: B,
    _document: PhantomData<fn(&D)>,
}

impl<D, B> ErasedBuilder for Typed<D, B>
where
    D: Document,
    B: XmlBuilder<D>,
{
    fn build_any(
        &self,
        document: &dyn Any,
        options: &BuilderOptions,
    ) -> Result<String, BuilderError> {
        let document = document
            .downcast_ref::<D>()
            .ok_or(BuilderError::TypeMismatch {
                expected: type_name::<D>(),
            })?;
        self.builder.build(document, options)
    }
}

struct Entry {
    type_name: &'static str,
    builder: Arc<dyn ErasedBuilder>,
}

/// Builders keyed by the concrete document type they accept.
///
/// At most one builder exists per type; registering again replaces it.
/// The default registry knows how to build [`Despatch`](crate::document::Despatch).
///
/// # Examples
/// ```rust
/// use gre_core::builder::BuilderRegistry;
/// use gre_core::document::Despatch;
///
/// let registry = BuilderRegistry::default();
/// assert!(registry.contains::<Despatch>());
/// assert!(!BuilderRegistry::empty().contains::<Despatch>());
/// ```
pub struct BuilderRegistry {
    builders: HashMap<TypeId, Entry>,
}

impl BuilderRegistry {
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    pub fn register<D, B>(&mut self, builder: B) -> &mut Self
    where
        D: Document,
        B: XmlBuilder<D> + 'static,
    {
        self.builders.insert(
            TypeId::of::<D>(),
            Entry {
                type_name: type_name::<D>(),
                builder: Arc::new(Typed {
                    builder,
                    _document: PhantomData,
                }),
            },
        );
        self
    }

    pub fn contains<D: Document>(&self) -> bool {
        self.builders.contains_key(&TypeId::of::<D>())
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}

impl Default for BuilderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register::<Despatch, _>(DespatchBuilder);
        registry
    }
}

impl fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.builders.values().map(|e| e.type_name).collect();
        names.sort_unstable();
        f.debug_struct("BuilderRegistry")
            .field("document_types", &names)
            .finish()
    }
}

/// Lookup over a registry with one fixed set of builder options.
pub struct XmlBuilderResolver<'a> {
    registry: &'a BuilderRegistry,
    options: BuilderOptions,
}

impl<'a> XmlBuilderResolver<'a> {
    pub fn new(registry: &'a BuilderRegistry, options: BuilderOptions) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> &BuilderOptions {
        &self.options
    }

    /// # Errors
    /// Returns [`BuilderError::NotFound`] if no builder accepts `D`.
    pub fn find<D: Document>(&self) -> Result<ResolvedBuilder<'_, D>, BuilderError> {
        let entry = self
            .registry
            .builders
            .get(&TypeId::of::<D>())
            .ok_or(BuilderError::NotFound {
                type_name: type_name::<D>(),
            })?;
        Ok(ResolvedBuilder {
            builder: entry.builder.as_ref(),
            options: &self.options,
            _document: PhantomData,
        })
    }
}

/// Builder selected for document type `D`, bound to the resolver's options.
pub struct ResolvedBuilder<'r, D> {
    builder: &'r dyn ErasedBuilder,
    options: &'r BuilderOptions,
    _document: PhantomData<fn(&D)>,
}

impl<D: Document> ResolvedBuilder<'_, D> {
    pub fn build(&self, document: &D) -> Result<String, BuilderError> {
        self.builder.build_any(document, self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Note(&'static str);

    impl Document for Note {
        fn name(&self) -> String {
            "note".into()
        }
    }

    struct NoteBuilder;

    impl XmlBuilder<Note> for NoteBuilder {
        fn build(&self, document: &Note, options: &BuilderOptions) -> Result<String, BuilderError> {
            Ok(format!("<Note escaped=\"{}\">{}</Note>", options.autoescape(), document.0))
        }
    }

    struct Shout;

    impl XmlBuilder<Note> for Shout {
        fn build(&self, document: &Note, _: &BuilderOptions) -> Result<String, BuilderError> {
            Ok(format!("<NOTE>{}</NOTE>", document.0.to_uppercase()))
        }
    }

    #[test]
    fn find_reports_unregistered_type() {
        let registry = BuilderRegistry::default();
        let resolver = XmlBuilderResolver::new(&registry, BuilderOptions::default());
        let err = resolver.find::<Note>().err().expect("missing builder");
        assert!(matches!(err, BuilderError::NotFound { type_name } if type_name.ends_with("Note")));
    }

    #[test]
    fn resolved_builder_uses_resolver_options() {
        let mut registry = BuilderRegistry::empty();
        registry.register::<Note, _>(NoteBuilder);
        let mut options = BuilderOptions::default();
        options.set(BuilderOptions::AUTOESCAPE, true);
        let resolver = XmlBuilderResolver::new(&registry, options);

        let xml = resolver
            .find::<Note>()
            .expect("builder")
            .build(&Note("hi"))
            .expect("xml");
        assert_eq!(xml, "<Note escaped=\"true\">hi</Note>");
    }

    #[test]
    fn registering_again_replaces_builder() {
        let mut registry = BuilderRegistry::empty();
        registry
            .register::<Note, _>(NoteBuilder)
            .register::<Note, _>(Shout);
        assert_eq!(registry.len(), 1);

        let resolver = XmlBuilderResolver::new(&registry, BuilderOptions::default());
        let xml = resolver.find::<Note>().unwrap().build(&Note("hi")).unwrap();
        assert_eq!(xml, "<NOTE>HI</NOTE>");
    }

    #[test]
    fn erased_builder_rejects_foreign_document() {
        let typed = Typed::<Note, NoteBuilder> {
            builder: NoteBuilder,
            _document: PhantomData,
        };
        let err = typed
            .build_any(&Despatch::default(), &BuilderOptions::default())
            .unwrap_err();
        assert!(matches!(err, BuilderError::TypeMismatch { .. }));
    }

    #[test]
    fn debug_lists_document_types() {
        let debug = format!("{:?}", BuilderRegistry::default());
        assert!(debug.contains("Despatch"));
    }
}
