//! Constant pool as handed over by the container parser
//!
//! Index 0 of every AVM2 table is implicit and never stored: accessors take
//! the 1-based file index and map 0 to the table's default meaning.

use std::rc::Rc;

use super::names::{Name, Namespace};

/// Error resolving a constant-pool reference
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("{table} index {index} out of range")]
    OutOfRange { table: &'static str, index: u32 },
    #[error("multiname {index} cannot be used as a type name")]
    BadTypeName { index: u32 },
}

/// Which parts of a multiname are supplied on the operand stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RuntimeParts {
    /// Fully known at compile time
    #[default]
    None,
    /// Local name comes from the stack
    Name,
    /// Namespace comes from the stack
    Namespace,
    /// Namespace and local name come from the stack
    Both,
}

impl RuntimeParts {
    /// Additional values the instruction pops
    pub fn extra_pops(self) -> u32 {
        match self {
            RuntimeParts::None => 0,
            RuntimeParts::Name | RuntimeParts::Namespace => 1,
            RuntimeParts::Both => 2,
        }
    }

    pub fn has_name(self) -> bool {
        matches!(self, RuntimeParts::Name | RuntimeParts::Both)
    }

    pub fn has_namespace(self) -> bool {
        matches!(self, RuntimeParts::Namespace | RuntimeParts::Both)
    }
}

/// Multiname constant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Multiname {
    /// `ns::name`
    QName { ns: u32, name: u32, attribute: bool },
    /// `name` in a namespace taken from the stack
    RtqName { name: u32, attribute: bool },
    /// Namespace and name taken from the stack
    RtqNameL { attribute: bool },
    /// `name` in any namespace of a set
    Multiname { name: u32, ns_set: u32, attribute: bool },
    /// Name from the stack, namespaces from a set
    MultinameL { ns_set: u32, attribute: bool },
    /// Parameterized type such as `Vector.<int>`
    TypeName { base: u32, params: Vec<u32> },
}

impl Multiname {
    pub fn runtime_parts(&self) -> RuntimeParts {
        match self {
            Multiname::QName { .. } | Multiname::Multiname { .. } | Multiname::TypeName { .. } => {
                RuntimeParts::None
            }
            Multiname::RtqName { .. } => RuntimeParts::Namespace,
            Multiname::RtqNameL { .. } => RuntimeParts::Both,
            Multiname::MultinameL { .. } => RuntimeParts::Name,
        }
    }
}

/// Constant tables of one ABC file
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    pub ints: Vec<i32>,
    pub uints: Vec<u32>,
    pub doubles: Vec<f64>,
    pub strings: Vec<Rc<str>>,
    pub namespaces: Vec<Namespace>,
    pub ns_sets: Vec<Vec<u32>>,
    pub multinames: Vec<Multiname>,
}

fn lookup<'a, T>(table: &'a [T], name: &'static str, index: u32) -> Result<&'a T, PoolError> {
    index
        .checked_sub(1)
        .and_then(|i| table.get(i as usize))
        .ok_or(PoolError::OutOfRange { table: name, index })
}

fn append<T>(table: &mut Vec<T>, value: T) -> u32 {
    table.push(value);
    table.len() as u32
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn int(&self, index: u32) -> Result<i32, PoolError> {
        lookup(&self.ints, "int", index).copied()
    }

    pub fn uint(&self, index: u32) -> Result<u32, PoolError> {
        lookup(&self.uints, "uint", index).copied()
    }

    pub fn double(&self, index: u32) -> Result<f64, PoolError> {
        lookup(&self.doubles, "double", index).copied()
    }

    pub fn string(&self, index: u32) -> Result<Rc<str>, PoolError> {
        lookup(&self.strings, "string", index).cloned()
    }

    /// String index 0 means "any name"
    fn name_string(&self, index: u32) -> Result<Rc<str>, PoolError> {
        if index == 0 {
            return Ok(Rc::from("*"));
        }
        self.string(index)
    }

    pub fn namespace(&self, index: u32) -> Result<Namespace, PoolError> {
        if index == 0 {
            return Ok(Namespace::any());
        }
        lookup(&self.namespaces, "namespace", index).cloned()
    }

    pub fn ns_set(&self, index: u32) -> Result<Vec<Namespace>, PoolError> {
        lookup(&self.ns_sets, "namespace set", index)?
            .iter()
            .map(|&ns| self.namespace(ns))
            .collect()
    }

    pub fn multiname(&self, index: u32) -> Result<&Multiname, PoolError> {
        lookup(&self.multinames, "multiname", index)
    }

    /// Resolve a multiname to its compile-time template.
    ///
    /// Runtime parts are left empty: `local` is `None` when the name comes
    /// from the stack, `namespaces` is empty when the namespace does.
    pub fn resolve_name(&self, index: u32) -> Result<Name, PoolError> {
        match self.multiname(index)? {
            Multiname::QName { ns, name, attribute } => Ok(Name::new(
                Some(self.name_string(*name)?),
                vec![self.namespace(*ns)?],
                *attribute,
            )),
            Multiname::RtqName { name, attribute } => {
                Ok(Name::new(Some(self.name_string(*name)?), Vec::new(), *attribute))
            }
            Multiname::RtqNameL { attribute } => Ok(Name::new(None, Vec::new(), *attribute)),
            Multiname::Multiname { name, ns_set, attribute } => Ok(Name::new(
                Some(self.name_string(*name)?),
                self.ns_set(*ns_set)?,
                *attribute,
            )),
            Multiname::MultinameL { ns_set, attribute } => {
                Ok(Name::new(None, self.ns_set(*ns_set)?, *attribute))
            }
            Multiname::TypeName { base, .. } => {
                if *base == index {
                    return Err(PoolError::BadTypeName { index });
                }
                // Parameterized types resolve to their base; the object model
                // sees `Vector` for `Vector.<T>`.
                self.resolve_name(*base)
            }
        }
    }

    // ===== Builders (used by encoders and tests) =====

    pub fn add_int(&mut self, value: i32) -> u32 {
        append(&mut self.ints, value)
    }

    pub fn add_uint(&mut self, value: u32) -> u32 {
        append(&mut self.uints, value)
    }

    pub fn add_double(&mut self, value: f64) -> u32 {
        append(&mut self.doubles, value)
    }

    pub fn add_string(&mut self, value: &str) -> u32 {
        if let Some(i) = self.strings.iter().position(|s| &**s == value) {
            return i as u32 + 1;
        }
        append(&mut self.strings, Rc::from(value))
    }

    pub fn add_namespace(&mut self, ns: Namespace) -> u32 {
        if let Some(i) = self.namespaces.iter().position(|n| *n == ns) {
            return i as u32 + 1;
        }
        append(&mut self.namespaces, ns)
    }

    pub fn add_ns_set(&mut self, set: Vec<u32>) -> u32 {
        append(&mut self.ns_sets, set)
    }

    pub fn add_multiname(&mut self, mn: Multiname) -> u32 {
        append(&mut self.multinames, mn)
    }

    /// Add `ns::local` and return its multiname index
    pub fn add_qname(&mut self, ns: Namespace, local: &str) -> u32 {
        let ns = self.add_namespace(ns);
        let name = self.add_string(local);
        self.add_multiname(Multiname::QName { ns, name, attribute: false })
    }

    /// Add a public `local` and return its multiname index
    pub fn add_public_qname(&mut self, local: &str) -> u32 {
        self.add_qname(Namespace::public(), local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_zero_defaults() {
        let pool = ConstantPool::new();
        assert!(pool.int(0).is_err());
        assert_eq!(pool.namespace(0).unwrap(), Namespace::any());
        assert!(matches!(
            pool.string(1),
            Err(PoolError::OutOfRange { table: "string", index: 1 })
        ));
    }

    #[test]
    fn test_resolve_qname() {
        let mut pool = ConstantPool::new();
        let idx = pool.add_public_qname("trace");
        let name = pool.resolve_name(idx).unwrap();
        assert_eq!(name.local.as_deref(), Some("trace"));
        assert_eq!(name.namespaces.len(), 1);
        assert!(name.namespaces[0].is_public());
    }

    #[test]
    fn test_runtime_parts() {
        let mut pool = ConstantPool::new();
        let set = pool.add_ns_set(vec![]);
        let late = pool.add_multiname(Multiname::MultinameL { ns_set: set, attribute: false });
        let both = pool.add_multiname(Multiname::RtqNameL { attribute: false });
        assert_eq!(pool.multiname(late).unwrap().runtime_parts().extra_pops(), 1);
        assert_eq!(pool.multiname(both).unwrap().runtime_parts().extra_pops(), 2);
        assert_eq!(pool.resolve_name(late).unwrap().local, None);
    }

    #[test]
    fn test_strings_are_interned() {
        let mut pool = ConstantPool::new();
        let a = pool.add_string("x");
        let b = pool.add_string("x");
        assert_eq!(a, b);
    }
}
