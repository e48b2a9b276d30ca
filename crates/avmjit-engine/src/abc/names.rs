//! Namespaces and resolved property names

use std::fmt;
use std::rc::Rc;

/// Namespace kinds from the ABC format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    Namespace,
    Package,
    PackageInternal,
    Protected,
    Explicit,
    StaticProtected,
    Private,
}

/// A namespace: kind plus URI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub kind: NamespaceKind,
    pub uri: Rc<str>,
}

/// URI of the AS3 builtin namespace
pub const AS3_NAMESPACE: &str = "http://adobe.com/AS3/2006/builtin";

impl Namespace {
    pub fn new(kind: NamespaceKind, uri: &str) -> Self {
        Namespace { kind, uri: Rc::from(uri) }
    }

    /// The public (empty package) namespace
    pub fn public() -> Self {
        Self::new(NamespaceKind::Package, "")
    }

    /// Wildcard namespace (constant pool index 0)
    pub fn any() -> Self {
        Self::new(NamespaceKind::Namespace, "*")
    }

    pub fn package(uri: &str) -> Self {
        Self::new(NamespaceKind::Package, uri)
    }

    pub fn private(uri: &str) -> Self {
        Self::new(NamespaceKind::Private, uri)
    }

    pub fn is_public(&self) -> bool {
        matches!(self.kind, NamespaceKind::Package | NamespaceKind::Namespace) && self.uri.is_empty()
    }

    pub fn is_as3(&self) -> bool {
        &*self.uri == AS3_NAMESPACE
    }
}

/// A property name after multiname resolution.
///
/// `local == None` means the local part is supplied at run time; an empty
/// namespace list means the namespace is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub local: Option<Rc<str>>,
    pub namespaces: Rc<[Namespace]>,
    pub attribute: bool,
}

impl Name {
    pub fn new(local: Option<Rc<str>>, namespaces: Vec<Namespace>, attribute: bool) -> Self {
        Name { local, namespaces: Rc::from(namespaces), attribute }
    }

    /// A public name
    pub fn public(local: &str) -> Self {
        Self::new(Some(Rc::from(local)), vec![Namespace::public()], false)
    }

    pub fn qualified(ns: Namespace, local: &str) -> Self {
        Self::new(Some(Rc::from(local)), vec![ns], false)
    }

    /// Local part, `*` when unresolved
    pub fn local_name(&self) -> &str {
        self.local.as_deref().unwrap_or("*")
    }

    /// Whether any candidate namespace is public or the AS3 builtin one
    pub fn is_public_or_builtin(&self) -> bool {
        self.namespaces.iter().any(|ns| ns.is_public() || ns.is_as3())
    }

    /// Complete the template with runtime parts
    pub fn with_runtime(&self, ns: Option<Namespace>, local: Option<Rc<str>>) -> Name {
        Name {
            local: local.or_else(|| self.local.clone()),
            namespaces: match ns {
                Some(ns) => Rc::from(vec![ns]),
                None => self.namespaces.clone(),
            },
            attribute: self.attribute,
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attribute {
            f.write_str("@")?;
        }
        match self.namespaces.as_ref() {
            [] => write!(f, "?::{}", self.local_name()),
            [ns] if ns.is_public() => f.write_str(self.local_name()),
            [ns] => write!(f, "{}::{}", ns.uri, self.local_name()),
            many => write!(f, "[{} namespaces]::{}", many.len(), self.local_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Name::public("Math").to_string(), "Math");
        assert_eq!(Name::qualified(Namespace::package("flash.display"), "Sprite").to_string(),
            "flash.display::Sprite");
        let rt = Name::new(None, vec![], false);
        assert_eq!(rt.to_string(), "?::*");
    }

    #[test]
    fn test_with_runtime() {
        let template = Name::new(None, vec![Namespace::public()], false);
        let done = template.with_runtime(None, Some(Rc::from("x")));
        assert_eq!(done, Name::public("x"));
    }
}
